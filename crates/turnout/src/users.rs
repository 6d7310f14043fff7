use crate::store::{Storage, StoreError};
use thiserror::Error;
use turnout_core::{validate_identity, IdentityError};

#[derive(Error, Debug)]
pub enum RegisterError {
    #[error("invalid name: {0}")]
    Identity(#[from] IdentityError),
    #[error("photo is not a readable image: {0}")]
    Photo(#[from] image::ImageError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Validate `name` and `photo`, then store the user. Returns the stored (trimmed) name.
///
/// The photo only has to decode; whether it contains a face is checked when
/// the directory is loaded.
pub async fn register_user(
    store: &dyn Storage,
    name: &str,
    photo: &[u8],
) -> Result<String, RegisterError> {
    let identity = validate_identity(name)?;
    let decoded = image::load_from_memory(photo)?;
    store.add_user(identity, photo).await?;
    tracing::info!(
        identity,
        width = decoded.width(),
        height = decoded.height(),
        "user registered"
    );
    Ok(identity.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use std::path::Path;

    fn png() -> Vec<u8> {
        let mut bytes = Vec::new();
        image::RgbImage::new(4, 4)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[tokio::test]
    async fn test_register_trims_and_stores() {
        let store = SqliteStore::open(Path::new(":memory:")).await.unwrap();
        let name = register_user(&store, "  Alice ", &png()).await.unwrap();

        assert_eq!(name, "Alice");
        assert_eq!(store.list_users().await.unwrap()[0].identity, "Alice");
    }

    #[tokio::test]
    async fn test_register_rejects_bad_input() {
        let store = SqliteStore::open(Path::new(":memory:")).await.unwrap();

        assert!(matches!(
            register_user(&store, "Agent 007", &png()).await,
            Err(RegisterError::Identity(IdentityError::ContainsDigits(_)))
        ));
        assert!(matches!(
            register_user(&store, "Alice", b"GIF? no").await,
            Err(RegisterError::Photo(_))
        ));
        assert_eq!(store.count_users().await.unwrap(), 0);

        register_user(&store, "Alice", &png()).await.unwrap();
        assert!(matches!(
            register_user(&store, "Alice", &png()).await,
            Err(RegisterError::Store(StoreError::DuplicateUser(_)))
        ));
    }
}
