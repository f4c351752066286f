pub mod catalog;
pub mod imports;
pub mod ingest;
pub mod jobs;
pub mod misc;
pub mod tags;

pub use catalog::{
    Design, DesignFile, DesignSource, DesignStatus, FileKind, MetadataAuthority, ModelKind,
    Multicolor, PreviewAsset, PreviewKind, PreviewSource,
};
pub use imports::{
    ImportProfile, ImportProfileShape, ImportRecord, ImportRecordStatus, ImportSource,
    ImportSourceKind, ImportSourceStatus,
};
pub use ingest::{
    Attachment, AttachmentDownloadStatus, AttachmentType, Channel, DownloadMode, Message,
};
pub use jobs::{Job, JobStatus, JobType, QueueStatsByStatus};
pub use misc::{
    Credential, CredentialKind, DiscoveredChannel, DiscoveredChannelSort, DiscoveredChannelStatus,
    DiscoverySourceType, DuplicateCandidate, DuplicateCandidateStatus, ExternalMetadataSource,
    ExternalPlatform, MatchMethod, Setting,
};
pub use tags::{Tag, TagSource};
