use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use speed_test_types::{MAX_PAYLOAD_BYTES, REFERENCE_PAYLOAD_BYTES};

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("failed to read payload file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("payload file {} is empty", path.display())]
    Empty { path: PathBuf },
    #[error("payload file {} has {size} bytes, more than the {max} allowed", path.display())]
    TooLarge {
        path: PathBuf,
        size: u64,
        max: usize,
    },
}

/// Loads the reply payload once at startup.
///
/// Without a file the reference-size buffer is generated.
pub async fn load_payload(path: Option<&Path>) -> Result<Arc<[u8]>, PayloadError> {
    let Some(path) = path else {
        return Ok(generate_payload(REFERENCE_PAYLOAD_BYTES));
    };
    let read_err = |source| PayloadError::Read {
        path: path.to_owned(),
        source,
    };
    let size = tokio::fs::metadata(path).await.map_err(read_err)?.len();
    if size > MAX_PAYLOAD_BYTES as u64 {
        return Err(PayloadError::TooLarge {
            path: path.to_owned(),
            size,
            max: MAX_PAYLOAD_BYTES,
        });
    }
    let data = tokio::fs::read(path).await.map_err(read_err)?;
    if data.is_empty() {
        return Err(PayloadError::Empty {
            path: path.to_owned(),
        });
    }
    tracing::debug!(path = %path.display(), size = data.len(), "loaded payload file");
    Ok(data.into())
}

pub fn generate_payload(size: usize) -> Arc<[u8]> {
    vec![0u8; size].into()
}
