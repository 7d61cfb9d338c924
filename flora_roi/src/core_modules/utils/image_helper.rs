pub mod image_helper {
    use crate::error::{RoiError, RoiResult};
    use image::{ImageFormat, RgbImage};
    use std::path::{Path, PathBuf};

    pub fn load(path: &Path) -> RoiResult<RgbImage> {
        let image = image::open(path).map_err(|source| RoiError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(image.to_rgb8())
    }

    /// Hidden sibling used as the staging file for `target`.
    fn staging_path(target: &Path) -> PathBuf {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        target.with_file_name(format!(".{name}.{}.partial", uuid::Uuid::new_v4()))
    }

    fn commit(staging: &Path, target: &Path) -> RoiResult<()> {
        std::fs::rename(staging, target).map_err(|e| {
            let _ = std::fs::remove_file(staging);
            RoiError::io(format!("renaming into {}", target.display()), e)
        })
    }

    /// Encodes `image` next to `target` and renames it into place, so readers
    /// never observe a half-written file. The format follows `target`'s extension.
    pub fn save_atomically(image: &RgbImage, target: &Path) -> RoiResult<()> {
        let format = ImageFormat::from_path(target).map_err(|source| RoiError::Encode {
            path: target.to_path_buf(),
            source,
        })?;
        let staging = staging_path(target);
        if let Err(source) = image.save_with_format(&staging, format) {
            let _ = std::fs::remove_file(&staging);
            return Err(RoiError::Encode {
                path: target.to_path_buf(),
                source,
            });
        }
        commit(&staging, target)
    }

    /// Byte-for-byte copy of `source` to `target`, staged and renamed like
    /// `save_atomically`.
    pub fn copy_atomically(source: &Path, target: &Path) -> RoiResult<()> {
        let staging = staging_path(target);
        if let Err(e) = std::fs::copy(source, &staging) {
            let _ = std::fs::remove_file(&staging);
            return Err(RoiError::io(
                format!("copying {} to {}", source.display(), target.display()),
                e,
            ));
        }
        commit(&staging, target)
    }
}
