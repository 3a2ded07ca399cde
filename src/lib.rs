pub mod cache;
pub mod callback;
pub mod combine;
pub mod config;
pub mod downloader;
pub mod error;
pub mod handle;
pub mod humanize;
pub mod observability;
pub mod stack;
pub mod task;

pub use callback::{Callback, ChildCallback, CombinedCallback, DownloadCallback, NoopCallback};
pub use combine::{CombinedContext, CombinedDownloader, CombinedTask};
pub use downloader::{Downloader, DownloaderService};
pub use error::{DownloadError, Result};
pub use handle::DownloadHandle;
pub use task::{DownloadSession, DownloadTask, Locator};
