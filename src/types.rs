use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Platforms a library can be tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LibraryPlatform {
    Pcwin,
    Pclnx,
    Pcmac,
    Nes,
    Snes,
    N64,
    Gc,
    Wii,
    Switch,
    Gb,
    Gbc,
    Gba,
    Nds,
    N3ds,
    Psx,
    Ps2,
    Ps3,
    Psp,
    Xbox,
    X360,
    Genesis,
    Other,
}

impl LibraryPlatform {
    pub const ALL: [LibraryPlatform; 22] = [
        Self::Pcwin,
        Self::Pclnx,
        Self::Pcmac,
        Self::Nes,
        Self::Snes,
        Self::N64,
        Self::Gc,
        Self::Wii,
        Self::Switch,
        Self::Gb,
        Self::Gbc,
        Self::Gba,
        Self::Nds,
        Self::N3ds,
        Self::Psx,
        Self::Ps2,
        Self::Ps3,
        Self::Psp,
        Self::Xbox,
        Self::X360,
        Self::Genesis,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pcwin => "PCWIN",
            Self::Pclnx => "PCLNX",
            Self::Pcmac => "PCMAC",
            Self::Nes => "NES",
            Self::Snes => "SNES",
            Self::N64 => "N64",
            Self::Gc => "GC",
            Self::Wii => "WII",
            Self::Switch => "SWITCH",
            Self::Gb => "GB",
            Self::Gbc => "GBC",
            Self::Gba => "GBA",
            Self::Nds => "NDS",
            Self::N3ds => "N3DS",
            Self::Psx => "PSX",
            Self::Ps2 => "PS2",
            Self::Ps3 => "PS3",
            Self::Psp => "PSP",
            Self::Xbox => "XBOX",
            Self::X360 => "X360",
            Self::Genesis => "GENESIS",
            Self::Other => "OTHER",
        }
    }
}

impl FromStr for LibraryPlatform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == upper)
            .ok_or_else(|| format!("unknown platform '{}'", s))
    }
}

/// How a scan turns directory entries into game candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Every immediate subfolder of the root is one game.
    #[default]
    Folders,
    /// Every file with an allowed extension, at any depth, is one game.
    Files,
}

impl ScanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::Folders => "folders",
            ScanMode::Files => "files",
        }
    }
}

impl FromStr for ScanMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "folders" => Ok(ScanMode::Folders),
            "files" => Ok(ScanMode::Files),
            other => Err(format!("unknown scan mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanJobStatus {
    Scheduled,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ScanJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanJobStatus::Scheduled => "Scheduled",
            ScanJobStatus::Running => "Running",
            ScanJobStatus::Completed => "Completed",
            ScanJobStatus::Failed => "Failed",
            ScanJobStatus::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for ScanJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Processing,
    Available,
    Failed,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::Processing => "processing",
            DownloadStatus::Available => "available",
            DownloadStatus::Failed => "failed",
        }
    }
}

/// Triage state of a folder the scanner could not match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnmatchedStatus {
    Unmatched,
    Ignore,
    Duplicate,
}

impl UnmatchedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnmatchedStatus::Unmatched => "Unmatched",
            UnmatchedStatus::Ignore => "Ignore",
            UnmatchedStatus::Duplicate => "Duplicate",
        }
    }
}

// ---------------------- libraries ----------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CreateLibraryRequest {
    pub name: String,
    pub platform: Option<String>,
    pub watch_path: Option<String>,
    pub auto_scan: Option<bool>,
    pub scan_mode: Option<ScanMode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryDto {
    pub uuid: String,
    pub name: String,
    pub platform: String,
    pub watch_path: Option<String>,
    pub auto_scan: bool,
    pub scan_mode: String,
    pub created_at: String,
    pub game_count: i64,
}

// ---------------------- games ----------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSummary {
    pub uuid: String,
    pub library_uuid: String,
    pub name: String,
    pub igdb_id: Option<i64>,
    pub size: i64,
    pub rating: Option<f64>,
    pub first_release_date: Option<String>,
    pub cover_url: Option<String>,
    pub times_downloaded: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameDetail {
    #[serde(flatten)]
    pub summary: GameSummary,
    pub full_disk_path: String,
    pub description: Option<String>,
    pub storyline: Option<String>,
    pub url: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
    pub date_created: String,
    pub last_updated: String,
    pub genres: Vec<String>,
    pub themes: Vec<String>,
    pub game_modes: Vec<String>,
    pub platforms: Vec<String>,
    pub developers: Vec<String>,
    pub publishers: Vec<String>,
    pub images: Vec<ImageDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageDto {
    pub image_type: String,
    pub url: String,
    /// Local path under `/images` once the downloader fetched it.
    pub local_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteGameQuery {
    pub delete_files: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GameListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

// ---------------------- scans ----------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CreateScanRequest {
    pub library_uuid: String,
    /// Defaults to the library's watch path.
    pub folder_path: Option<String>,
    pub scan_mode: Option<ScanMode>,
    pub remove_missing: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateScanResponse {
    pub id: Uuid,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJobDto {
    pub id: Uuid,
    pub library_uuid: String,
    pub folder_path: String,
    pub scan_mode: String,
    pub status: String,
    pub remove_missing: bool,
    pub total_folders: i64,
    pub folders_success: i64,
    pub folders_failed: i64,
    pub removed_count: i64,
    pub error_message: Option<String>,
    pub created_at: String,
    pub finished_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanEvent {
    Started {
        library_uuid: String,
        folder_path: String,
        total: u64,
    },
    Progress {
        processed: u64,
        total: u64,
        success: u64,
        failed: u64,
        current: String,
    },
    GameAdded {
        uuid: String,
        name: String,
        path: String,
    },
    Unmatched {
        path: String,
        cleaned_name: String,
    },
    Warning {
        path: String,
        code: String,
        message: String,
    },
    Done {
        total: u64,
        success: u64,
        failed: u64,
        removed: u64,
    },
    Cancelled,
    Failed {
        message: String,
    },
}

// ---------------------- unmatched ----------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnmatchedFolderDto {
    pub id: i64,
    pub library_uuid: String,
    pub scan_job_id: Option<String>,
    pub folder_path: String,
    pub cleaned_name: String,
    pub status: String,
    pub failed_time: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateUnmatchedRequest {
    pub status: UnmatchedStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchUnmatchedRequest {
    pub igdb_id: i64,
}

// ---------------------- downloads ----------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateDownloadRequest {
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequestDto {
    pub id: i64,
    pub game_uuid: String,
    pub game_name: String,
    pub user_id: Option<i64>,
    pub status: String,
    pub is_direct: bool,
    pub file_size: Option<i64>,
    pub error_message: Option<String>,
    pub request_time: String,
    pub completion_time: Option<String>,
}

// ---------------------- misc ----------------------

#[derive(Debug, Deserialize)]
pub struct IgdbSearchQuery {
    pub name: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct CleanNameQuery {
    pub raw: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CleanNameResponse {
    pub raw: String,
    pub cleaned: String,
}
