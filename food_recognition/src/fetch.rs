use crate::{
    config::FallbackModelConfig,
    resolver::{artifact_size, ModelLoadError},
};
use sha2::{Digest, Sha256};
use std::{
    io::{Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

/// Returns the local path of the fallback artifact, downloading it first if
/// the cache holds nothing plausible.
pub fn ensure_fallback_artifact(
    fallback: &FallbackModelConfig,
    min_bytes: u64,
) -> Result<PathBuf, ModelLoadError> {
    let dest = fallback.get_cached_path();
    if artifact_size(&dest).is_some_and(|size| size > min_bytes) {
        tracing::debug!("Using cached fallback model at {}", dest.display());
        return Ok(dest);
    }

    std::fs::create_dir_all(&fallback.cache_dir).map_err(|source| ModelLoadError::Io {
        path: fallback.cache_dir.clone(),
        source,
    })?;
    download_file(&fallback.url, &dest, fallback.sha256.as_deref())?;

    Ok(dest)
}

fn download_file(url: &str, dest: &Path, expected_sha256: Option<&str>) -> Result<(), ModelLoadError> {
    tracing::info!("Downloading {} to {}", url, dest.display());

    let agent = ureq::Agent::config_builder()
        .timeout_connect(Some(Duration::from_secs(10)))
        .timeout_global(Some(Duration::from_secs(600)))
        .build()
        .new_agent();

    let response = agent.get(url).call().map_err(|e| ModelLoadError::Fetch {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    persist(url, response.into_body().into_reader(), dest, expected_sha256)
}

/// Streams `reader` into `<dest>.part` and renames it over `dest` once the
/// digest checks out. The `.part` file never outlives a failure.
fn persist(
    url: &str,
    mut reader: impl Read,
    dest: &Path,
    expected_sha256: Option<&str>,
) -> Result<(), ModelLoadError> {
    let tmp = dest.with_extension("part");
    let mut file = std::fs::File::create(&tmp).map_err(|source| ModelLoadError::Io {
        path: tmp.clone(),
        source,
    })?;

    let result = stream_into(url, &mut reader, &mut file, &tmp).and_then(|(downloaded, actual)| {
        drop(file);
        if let Some(expected) = expected_sha256 {
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(ModelLoadError::Checksum {
                    path: dest.to_path_buf(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }
        std::fs::rename(&tmp, dest).map_err(|source| ModelLoadError::Io {
            path: dest.to_path_buf(),
            source,
        })?;
        tracing::info!("Downloaded {} bytes (sha256 {})", downloaded, actual);
        Ok(())
    });

    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

fn stream_into(
    url: &str,
    reader: &mut impl Read,
    file: &mut impl Write,
    tmp: &Path,
) -> Result<(u64, String), ModelLoadError> {
    let mut hasher = Sha256::new();
    let mut downloaded: u64 = 0;
    let mut buf = [0u8; 64 * 1024];

    loop {
        let n = reader.read(&mut buf).map_err(|e| ModelLoadError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).map_err(|source| ModelLoadError::Io {
            path: tmp.to_path_buf(),
            source,
        })?;
        hasher.update(&buf[..n]);
        downloaded += n as u64;
    }

    Ok((downloaded, format!("{:x}", hasher.finalize())))
}
