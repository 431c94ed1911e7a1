use std::path::{Path, PathBuf};

use color_eyre::eyre::{eyre, WrapErr};
use image::imageops::FilterType;
use tracing::warn;

/// Side length of a published avatar.
pub const AVATAR_SIZE: u32 = 250;

/// Normalize an uploaded image to a square cover crop and publish it at
/// `dest_path`. The temporary upload is removed on every exit path,
/// including decode and write failures.
pub async fn normalize_and_store(
    tmp_path: &Path,
    dest_path: &Path,
    width: u32,
    height: u32,
) -> color_eyre::Result<()> {
    let result = process(tmp_path, dest_path, width, height).await;

    if let Err(err) = tokio::fs::remove_file(tmp_path).await {
        warn!(
            "Failed to remove temporary upload {}: {err}",
            tmp_path.display()
        );
    }

    result
}

async fn process(
    tmp_path: &Path,
    dest_path: &Path,
    width: u32,
    height: u32,
) -> color_eyre::Result<()> {
    let bytes = tokio::fs::read(tmp_path)
        .await
        .wrap_err("Failed to read uploaded file")?;

    let is_image = infer::get(&bytes)
        .map(|kind| kind.matcher_type() == infer::MatcherType::Image)
        .unwrap_or(false);
    if !is_image {
        return Err(eyre!("Uploaded file is not a recognized image"));
    }

    if let Some(parent) = dest_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .wrap_err("Failed to create avatars directory")?;
    }

    // Decode and resize are CPU-bound; keep them off the request executor.
    let dest: PathBuf = dest_path.to_owned();
    tokio::task::spawn_blocking(move || -> color_eyre::Result<()> {
        let img = image::load_from_memory(&bytes).wrap_err("Failed to decode uploaded image")?;
        img.resize_to_fill(width, height, FilterType::Lanczos3)
            .save(&dest)
            .wrap_err("Failed to write normalized avatar")?;
        Ok(())
    })
    .await
    .wrap_err("Avatar processing task failed")??;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_png() -> Vec<u8> {
        let mut img = image::RgbaImage::new(400, 300);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            *pixel = image::Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255]);
        }

        let mut buffer = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut buffer),
            image::ImageFormat::Png,
        )
        .expect("Failed to encode sample image");
        buffer
    }

    #[tokio::test]
    async fn normalizes_to_square_and_removes_temp() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().join("upload.png");
        let dest = dir.path().join("avatars/out.png");
        tokio::fs::write(&tmp, sample_png()).await.unwrap();

        normalize_and_store(&tmp, &dest, AVATAR_SIZE, AVATAR_SIZE)
            .await
            .unwrap();

        let published = image::open(&dest).unwrap();
        assert_eq!(published.width(), AVATAR_SIZE);
        assert_eq!(published.height(), AVATAR_SIZE);
        assert!(!tmp.exists());
    }

    #[tokio::test]
    async fn temp_removed_even_when_decode_fails() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().join("upload.bin");
        let dest = dir.path().join("avatars/out.png");
        tokio::fs::write(&tmp, b"definitely not an image")
            .await
            .unwrap();

        let result = normalize_and_store(&tmp, &dest, AVATAR_SIZE, AVATAR_SIZE).await;

        assert!(result.is_err());
        assert!(!tmp.exists());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn missing_temp_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().join("never-written.png");
        let dest = dir.path().join("avatars/out.png");

        let result = normalize_and_store(&tmp, &dest, AVATAR_SIZE, AVATAR_SIZE).await;
        assert!(result.is_err());
    }
}
