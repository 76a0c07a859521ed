pub mod checksum;
pub mod descriptor;
pub mod downloader;
pub mod registry;

pub use checksum::HashKind;
pub use descriptor::{ArchiveKind, ModelDescriptor, ModelRef, DEFAULT_CONFIG_FILE, MODEL_DESC};
pub use downloader::{ArchiveFetcher, FetchRequest, HttpFetcher};
pub use registry::{ArchiveRecord, InstalledArchives};
