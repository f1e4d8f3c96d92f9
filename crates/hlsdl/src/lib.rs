pub mod assembler;
pub mod config;
pub mod decryption;
pub mod downloader;
pub mod error;
pub mod fetcher;
pub mod hls_downloader;
pub mod keys;
pub mod playlist;
pub mod progress;
pub mod remux;
pub mod retry;
pub mod segment;

pub use assembler::{Assembler, AssemblyReport};
pub use config::{FetcherConfig, HlsDlConfig, RemuxConfig};
pub use decryption::Decryptor;
pub use downloader::Downloader;
pub use error::DownloadError;
pub use fetcher::{HttpFetcher, ResourceFetcher};
pub use hls_downloader::{DownloadOutput, HlsDownloader};
pub use keys::KeyCache;
pub use playlist::{M3u8Resolver, SegmentResolver};
pub use progress::{ProgressBarObserver, ProgressObserver};
pub use remux::Remuxer;
pub use retry::RetryPolicy;
pub use segment::{DownloadResult, EncryptionInfo, EncryptionMethod, Segment, SegmentSet};
