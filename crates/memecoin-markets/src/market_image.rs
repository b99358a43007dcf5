//! Market images
//!
//! Single-token markets use the token's own image. Battle markets try a
//! side-by-side composite of both token images, then fall back to token 1's
//! image, then token 2's, then none.

use std::io::Cursor;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, RgbaImage};
use reqwest::Client;
use tracing::{debug, warn};
use uuid::Uuid;

/// Edge length of each half of a composite (pixels)
pub const TILE_SIZE: u32 = 400;

/// Ordered fallback for battle images
pub fn resolve_battle_image(
    composite: Option<String>,
    image_1: Option<&str>,
    image_2: Option<&str>,
) -> Option<String> {
    composite.or_else(|| image_1.map(str::to_string)).or_else(|| image_2.map(str::to_string))
}

/// Build and persist a side-by-side image, returning its public URL
#[async_trait]
pub trait ImageCompositor: Send + Sync {
    async fn composite(&self, left_url: &str, right_url: &str) -> Result<String>;
}

/// Battle image for two tokens, never failing: composite when possible, fallbacks otherwise
pub async fn battle_image(
    compositor: Option<&dyn ImageCompositor>,
    image_1: Option<&str>,
    image_2: Option<&str>,
) -> Option<String> {
    let composite = match (compositor, image_1, image_2) {
        (Some(compositor), Some(left), Some(right)) => match compositor.composite(left, right).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("Battle image compositing failed, falling back: {:#}", e);
                None
            }
        },
        _ => None,
    };
    resolve_battle_image(composite, image_1, image_2)
}

/// Downloads both images, tiles them and writes a PNG under `output_dir`
pub struct FileCompositor {
    client: Client,
    output_dir: PathBuf,
    url_prefix: String,
}

impl FileCompositor {
    pub fn new(output_dir: impl Into<PathBuf>, url_prefix: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client, output_dir: output_dir.into(), url_prefix: url_prefix.trim_end_matches('/').to_string() })
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        debug!("GET {}", url);
        let response = self.client.get(url).send().await.context("Image request failed")?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("HTTP {} for image {}", status, url);
        }
        Ok(response.bytes().await.context("Failed to read image body")?.to_vec())
    }
}

/// Decode both sources and lay them out left/right as one PNG
pub fn compose_side_by_side(left: &[u8], right: &[u8]) -> Result<Vec<u8>> {
    let left = image::load_from_memory(left).context("Failed to decode left image")?;
    let right = image::load_from_memory(right).context("Failed to decode right image")?;

    let mut canvas = RgbaImage::new(TILE_SIZE * 2, TILE_SIZE);
    let left = left.resize_to_fill(TILE_SIZE, TILE_SIZE, FilterType::Triangle).to_rgba8();
    let right = right.resize_to_fill(TILE_SIZE, TILE_SIZE, FilterType::Triangle).to_rgba8();
    imageops::overlay(&mut canvas, &left, 0, 0);
    imageops::overlay(&mut canvas, &right, TILE_SIZE as i64, 0);

    let mut png = Vec::new();
    DynamicImage::ImageRgba8(canvas)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .context("Failed to encode composite")?;
    Ok(png)
}

#[async_trait]
impl ImageCompositor for FileCompositor {
    async fn composite(&self, left_url: &str, right_url: &str) -> Result<String> {
        let left = self.fetch(left_url).await?;
        let right = self.fetch(right_url).await?;

        let png = tokio::task::spawn_blocking(move || compose_side_by_side(&left, &right))
            .await
            .context("Compositing task panicked")??;

        let filename = format!("battle_{}.png", Uuid::new_v4());
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let path = self.output_dir.join(&filename);
        tokio::fs::write(&path, &png).await.with_context(|| format!("Failed to write {}", path.display()))?;

        debug!("Wrote battle image {}", path.display());
        Ok(format!("{}/{}", self.url_prefix, filename))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FailingCompositor;

    #[async_trait]
    impl ImageCompositor for FailingCompositor {
        async fn composite(&self, _left: &str, _right: &str) -> Result<String> {
            anyhow::bail!("compositor offline")
        }
    }

    fn solid_png(w: u32, h: u32, color: [u8; 4]) -> Vec<u8> {
        let img = RgbaImage::from_pixel(w, h, Rgba(color));
        let mut out = Vec::new();
        DynamicImage::ImageRgba8(img).write_to(&mut Cursor::new(&mut out), ImageFormat::Png).unwrap();
        out
    }

    #[test]
    fn test_fallback_order() {
        assert_eq!(
            resolve_battle_image(Some("/images/c.png".to_string()), Some("a"), Some("b")),
            Some("/images/c.png".to_string())
        );
        assert_eq!(resolve_battle_image(None, Some("a"), Some("b")), Some("a".to_string()));
        assert_eq!(resolve_battle_image(None, None, Some("b")), Some("b".to_string()));
        assert_eq!(resolve_battle_image(None, None, None), None);
    }

    #[tokio::test]
    async fn test_compositor_failure_falls_back_to_first() {
        let image = battle_image(Some(&FailingCompositor as &dyn ImageCompositor), Some("a"), Some("b")).await;
        assert_eq!(image, Some("a".to_string()));
    }

    #[tokio::test]
    async fn test_missing_source_skips_compositor() {
        let image = battle_image(Some(&FailingCompositor as &dyn ImageCompositor), None, Some("b")).await;
        assert_eq!(image, Some("b".to_string()));
    }

    #[test]
    fn test_compose_side_by_side() {
        let png = compose_side_by_side(&solid_png(10, 20, [255, 0, 0, 255]), &solid_png(30, 30, [0, 0, 255, 255]))
            .unwrap();
        let img = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (TILE_SIZE * 2, TILE_SIZE));
        assert_eq!(img.get_pixel(10, 10).0, [255, 0, 0, 255]);
        assert_eq!(img.get_pixel(TILE_SIZE + 10, 10).0, [0, 0, 255, 255]);
    }

    #[test]
    fn test_compose_rejects_garbage() {
        assert!(compose_side_by_side(b"nope", &solid_png(1, 1, [0, 0, 0, 255])).is_err());
    }

    #[tokio::test]
    async fn test_file_compositor_writes_png() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(solid_png(8, 8, [1, 2, 3, 255])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(solid_png(8, 8, [4, 5, 6, 255])))
            .mount(&server)
            .await;

        let dir = std::env::temp_dir().join(format!("battle-images-{}", Uuid::new_v4()));
        let compositor = FileCompositor::new(&dir, "/images/").unwrap();
        let url = compositor
            .composite(&format!("{}/a.png", server.uri()), &format!("{}/b.png", server.uri()))
            .await
            .unwrap();

        assert!(url.starts_with("/images/battle_"));
        assert!(url.ends_with(".png"));
        let filename = url.trim_start_matches("/images/");
        assert!(dir.join(filename).exists());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_file_compositor_missing_source_errors() {
        let server = MockServer::start().await;
        let dir = std::env::temp_dir().join(format!("battle-images-{}", Uuid::new_v4()));
        let compositor = FileCompositor::new(&dir, "/images").unwrap();
        let result = compositor
            .composite(&format!("{}/a.png", server.uri()), &format!("{}/b.png", server.uri()))
            .await;
        assert!(result.is_err());
    }
}
