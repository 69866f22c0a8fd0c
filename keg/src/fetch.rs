use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use futures::StreamExt;
use keg_linter::{formula::Formula, logger::TaskLogger};
use reqwest::header::USER_AGENT;
use tracing::debug;
use url::Url;

use crate::{
    checksum::verify_sha256,
    error::{Error, Result},
    types::KegEnv,
};

enum Source {
    Remote(Url),
    Local(PathBuf),
}

fn parse_source(url: &str) -> Result<Source> {
    match Url::parse(url) {
        Ok(parsed) => match parsed.scheme() {
            "http" | "https" => Ok(Source::Remote(parsed)),
            "file" => parsed
                .to_file_path()
                .map(Source::Local)
                .map_err(|_| Error::UnsupportedUrl(url.to_string())),
            _ => Err(Error::UnsupportedUrl(url.to_string())),
        },
        Err(url::ParseError::RelativeUrlWithoutBase) => Ok(Source::Local(PathBuf::from(url))),
        Err(err) => Err(err.into()),
    }
}

/// Downloads `url` to `out`. Remote sources stream into `<out>.part` which is
/// renamed once complete; `file://` URLs and plain paths are copied.
pub async fn download<P: AsRef<Path>>(url: &str, out: P) -> Result<()> {
    let output_path = out.as_ref();
    if let Some(output_dir) = output_path.parent() {
        fs::create_dir_all(output_dir)?;
    }

    let temp_path = PathBuf::from(format!("{}.part", output_path.display()));
    if temp_path.exists() {
        fs::remove_file(&temp_path)?;
    }

    match parse_source(url)? {
        Source::Local(path) => {
            debug!("copying {} -> {}", path.display(), temp_path.display());
            fs::copy(&path, &temp_path)?;
        }
        Source::Remote(url) => {
            let client = reqwest::Client::new();
            let response = client
                .get(url)
                .header(USER_AGENT, concat!("keg/", env!("CARGO_PKG_VERSION")))
                .send()
                .await?
                .error_for_status()?;

            let mut stream = response.bytes_stream();
            let mut file = OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&temp_path)?;

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        let _ = fs::remove_file(&temp_path);
                        return Err(err.into());
                    }
                };
                file.write_all(&chunk)?;
            }
            file.flush()?;
        }
    }

    fs::rename(&temp_path, output_path)?;
    Ok(())
}

/// Makes the formula's source archive available in the download cache and
/// verifies it against the declared sha256.
///
/// A cached archive that fails verification is discarded and fetched again
/// once. A fresh download that fails verification is deleted.
pub async fn fetch_source(formula: &Formula, env: &KegEnv, logger: &TaskLogger) -> Result<PathBuf> {
    let dest = env.download_path(&formula.name, &formula.version, &formula.archive_name());

    if dest.exists() {
        match verify_sha256(&dest, &formula.sha256) {
            Ok(_) => {
                logger.info(format!("Using cached download {}", dest.display()));
                return Ok(dest);
            }
            Err(Error::ChecksumMismatch { actual, .. }) => {
                logger.warn(format!(
                    "Cached download {} has sha256 {}, fetching again",
                    dest.display(),
                    actual
                ));
                fs::remove_file(&dest)?;
            }
            Err(err) => return Err(err),
        }
    }

    logger.info(format!("Downloading {}", formula.url));
    download(&formula.url, &dest).await?;

    match verify_sha256(&dest, &formula.sha256) {
        Ok(actual) => {
            logger.info(format!("Verified sha256 {}", actual));
            Ok(dest)
        }
        Err(err) => {
            let _ = fs::remove_file(&dest);
            Err(err)
        }
    }
}
