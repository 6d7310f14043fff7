//! User directory: one reference embedding per registered user.

use crate::provider::FaceEmbedder;
use crate::types::{KnownFace, UserRecord};

/// Build the directory from stored user photos.
///
/// Users whose photo cannot be decoded, contains no face, or fails to embed
/// are skipped with a warning. When a photo contains several faces only the
/// first detected one is kept.
pub fn load_known_faces(users: &[UserRecord], embedder: &mut dyn FaceEmbedder) -> Vec<KnownFace> {
    let mut known = Vec::with_capacity(users.len());

    for user in users {
        let image = match image::load_from_memory(&user.photo) {
            Ok(img) => img.to_rgb8(),
            Err(e) => {
                tracing::warn!(user = %user.identity, error = %e, "directory: photo not decodable; skipping");
                continue;
            }
        };

        let faces = match embedder.detect_faces(&image) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(user = %user.identity, error = %e, "directory: detection failed; skipping");
                continue;
            }
        };

        let Some(first) = faces.into_iter().next() else {
            tracing::warn!(user = %user.identity, "directory: no face in photo; skipping");
            continue;
        };

        match embedder.embed(&image, std::slice::from_ref(&first)) {
            Ok(mut embeddings) if !embeddings.is_empty() => {
                known.push(KnownFace {
                    identity: user.identity.clone(),
                    embedding: embeddings.swap_remove(0),
                });
            }
            Ok(_) => {
                tracing::warn!(user = %user.identity, "directory: embedder returned nothing; skipping");
            }
            Err(e) => {
                tracing::warn!(user = %user.identity, error = %e, "directory: embedding failed; skipping");
            }
        }
    }

    tracing::info!(
        users = users.len(),
        loaded = known.len(),
        "user directory loaded"
    );
    known
}
