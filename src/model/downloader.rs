use crate::error::{Error, Result};
use crate::model::checksum::{self, HashKind};
use crate::model::descriptor::ArchiveKind;
use flate2::read::GzDecoder;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Duration;
use zip::ZipArchive;

/// Everything a fetcher needs to produce an extracted MMAR directory.
#[derive(Debug, Clone)]
pub struct FetchRequest<'a> {
    pub url: &'a str,
    pub archive_path: PathBuf,
    pub output_dir: PathBuf,
    pub hash_val: Option<&'a str>,
    pub hash_kind: HashKind,
    pub archive_kind: ArchiveKind,
    pub progress: bool,
}

pub trait ArchiveFetcher {
    /// Downloads, verifies and extracts, returning the extracted directory.
    fn fetch_and_extract(&self, request: &FetchRequest<'_>) -> Result<PathBuf>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(3600))
            .user_agent(concat!("mmar-hub/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::DownloadFailed(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    fn download(&self, request: &FetchRequest<'_>) -> Result<()> {
        if let Some(parent) = request.archive_path.parent() {
            fs::create_dir_all(parent)?;
        }

        tracing::info!("Downloading {} to {:?}", request.url, request.archive_path);

        let response = self
            .client
            .get(request.url)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|e| Error::DownloadFailed(format!("{}: {}", request.url, e)))?;

        let pb = progress_bar(request, response.content_length())?;
        let mut partial = request.archive_path.clone().into_os_string();
        partial.push(".part");
        let partial = PathBuf::from(partial);
        let mut writer = BufWriter::new(File::create(&partial)?);
        let mut reader = pb.wrap_read(response);

        let written = io::copy(&mut reader, &mut writer)
            .map_err(|e| Error::DownloadFailed(format!("{}: {}", request.url, e)))?;
        drop(writer);
        pb.finish_and_clear();

        fs::rename(&partial, &request.archive_path)?;
        tracing::info!("Downloaded {} bytes", written);

        Ok(())
    }
}

impl ArchiveFetcher for HttpFetcher {
    fn fetch_and_extract(&self, request: &FetchRequest<'_>) -> Result<PathBuf> {
        if request.archive_path.exists() {
            checksum::verify(&request.archive_path, request.hash_kind, request.hash_val)?;
            tracing::info!(
                "File exists: {:?}, skipped downloading",
                request.archive_path
            );
        } else {
            self.download(request)?;
            checksum::verify(&request.archive_path, request.hash_kind, request.hash_val)?;
        }

        extract(&request.archive_path, request.archive_kind, &request.output_dir)?;
        Ok(request.output_dir.clone())
    }
}

fn progress_bar(request: &FetchRequest<'_>, total: Option<u64>) -> Result<ProgressBar> {
    if !request.progress {
        return Ok(ProgressBar::hidden());
    }

    let pb = match total {
        Some(total) => {
            let pb = ProgressBar::new(total);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                    .map_err(|e| Error::DownloadFailed(e.to_string()))?
                    .progress_chars("=>-"),
            );
            pb
        }
        None => {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} [{elapsed_precise}] {msg} {bytes}")
                    .map_err(|e| Error::DownloadFailed(e.to_string()))?,
            );
            pb
        }
    };

    let name = request
        .archive_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| request.url.to_string());
    pb.set_message(name);

    Ok(pb)
}

/// Unpacks `archive` into `output_dir`. A non-empty `output_dir` is left alone.
pub fn extract(archive: &Path, kind: ArchiveKind, output_dir: &Path) -> Result<()> {
    if is_non_empty_dir(output_dir)? {
        tracing::info!(
            "Non-empty folder exists in {:?}, skipped extracting",
            output_dir
        );
        return Ok(());
    }

    fs::create_dir_all(output_dir)?;
    tracing::info!("Extracting {:?} to {:?}", archive, output_dir);

    let file = File::open(archive)?;
    match kind {
        ArchiveKind::Zip => ZipArchive::new(file)
            .and_then(|mut zip| zip.extract(output_dir))
            .map_err(|e| Error::ExtractFailed(format!("{:?}: {}", archive, e))),
        ArchiveKind::Tar => tar::Archive::new(file)
            .unpack(output_dir)
            .map_err(|e| Error::ExtractFailed(format!("{:?}: {}", archive, e))),
        ArchiveKind::TarGz => tar::Archive::new(GzDecoder::new(file))
            .unpack(output_dir)
            .map_err(|e| Error::ExtractFailed(format!("{:?}: {}", archive, e))),
    }
}

fn is_non_empty_dir(path: &Path) -> Result<bool> {
    if !path.is_dir() {
        return Ok(false);
    }
    Ok(fs::read_dir(path)?.next().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    fn write_zip(path: &Path) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file("models/model.pt", FileOptions::default()).unwrap();
        zip.write_all(b"weights").unwrap();
        zip.start_file("config/config_train.json", FileOptions::default())
            .unwrap();
        zip.write_all(br#"{"train": {"model": {"name": "UNet"}}}"#)
            .unwrap();
        zip.finish().unwrap();
    }

    fn request<'a>(archive_path: PathBuf, output_dir: PathBuf) -> FetchRequest<'a> {
        FetchRequest {
            url: "http://127.0.0.1:9/never-contacted.zip",
            archive_path,
            output_dir,
            hash_val: None,
            hash_kind: HashKind::Md5,
            archive_kind: ArchiveKind::Zip,
            progress: false,
        }
    }

    #[test]
    fn existing_archive_is_extracted_without_downloading() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("demo.zip");
        write_zip(&archive);
        let output = tmp.path().join("demo");

        let fetcher = HttpFetcher::new().unwrap();
        let dir = fetcher
            .fetch_and_extract(&request(archive, output.clone()))
            .unwrap();

        assert_eq!(dir, output);
        assert_eq!(
            fs::read(output.join("models").join("model.pt")).unwrap(),
            b"weights"
        );
        assert!(output.join("config").join("config_train.json").is_file());
    }

    #[test]
    fn existing_archive_with_bad_hash_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("demo.zip");
        write_zip(&archive);

        let mut req = request(archive, tmp.path().join("demo"));
        req.hash_val = Some("0123456789abcdef0123456789abcdef");

        let err = HttpFetcher::new()
            .unwrap()
            .fetch_and_extract(&req)
            .unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
    }

    #[test]
    fn non_empty_output_is_not_overwritten() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("demo.zip");
        write_zip(&archive);
        let output = tmp.path().join("demo");
        fs::create_dir_all(&output).unwrap();
        fs::write(output.join("marker"), b"keep").unwrap();

        extract(&archive, ArchiveKind::Zip, &output).unwrap();

        assert!(output.join("marker").is_file());
        assert!(!output.join("models").exists());
    }

    #[test]
    fn tar_gz_extracts() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("demo.tar.gz");
        {
            let file = File::create(&archive).unwrap();
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut builder = tar::Builder::new(encoder);
            let data = b"{}";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, "config_train.json", &data[..])
                .unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        let output = tmp.path().join("demo");
        extract(&archive, ArchiveKind::TarGz, &output).unwrap();
        assert_eq!(fs::read(output.join("config_train.json")).unwrap(), b"{}");
    }
}
