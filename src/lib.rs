pub mod cli;
pub mod downloader;
pub mod file_manager;
pub mod html_parser;
pub mod ledger;
pub mod localizer;
pub mod mirror;
pub mod references;

// Re-export main types for convenience
pub use cli::MirrorCommand;
pub use downloader::{fetch_page, FetchedPage, HttpClient, HttpResponse, ReqwestClient};
pub use file_manager::FileManager;
pub use html_parser::{HtmlDocument, PageStats};
pub use ledger::{Ledger, LedgerError, LedgerRecord, UpsertOutcome};
pub use localizer::{AssetLocalizer, LocalizeReport};
pub use mirror::{MirrorConfig, MirrorSummary, PageReport, WebsiteMirror};
pub use references::ReferenceMap;
