use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::bracket::{BracketMode, BracketStore, Competitor, Match};
use crate::competitors::CompetitorList;

// ── Constants ──────────────────────────────────────────────────────────

pub const MAX_COMPETITORS: usize = 1024;
pub const DEFAULT_PORT: u16 = 17880;
pub const DEFAULT_THEME: &str = "classic";
/// First-round match count above which exports switch to the large canvas.
pub const LARGE_BRACKET_MATCHES: usize = 50;

// ── Shared state type aliases ──────────────────────────────────────────

pub type SharedSession = Arc<Mutex<BracketSession>>;
pub type SharedConfig = Arc<Mutex<AppConfig>>;

// ── Session ────────────────────────────────────────────────────────────

/// Everything one operator session owns: the roster, the current bracket
/// and the mode that produced it. `mode` is `None` until the first
/// generate, and the store is always replaced as a whole.
#[derive(Debug, Default)]
pub struct BracketSession {
    pub competitors: CompetitorList,
    pub store: BracketStore,
    pub mode: Option<BracketMode>,
}

impl BracketSession {
    pub fn new() -> Self {
        BracketSession {
            competitors: CompetitorList::new(),
            store: BracketStore::default(),
            mode: None,
        }
    }

    pub fn snapshot(&self) -> BracketSnapshot {
        BracketSnapshot {
            competitors: self.competitors.all().to_vec(),
            mode: self.mode,
            rounds: self.store.rounds.clone(),
            winners: self.store.winners.clone(),
            champion: self.store.champion().cloned(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketSnapshot {
    pub competitors: Vec<Competitor>,
    pub mode: Option<BracketMode>,
    pub rounds: Vec<Vec<Match>>,
    pub winners: Vec<Vec<Competitor>>,
    pub champion: Option<Competitor>,
}

#[derive(Clone)]
pub struct HostServerState {
    pub session: SharedSession,
    pub config: SharedConfig,
}

// ── Request payloads ───────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCompetitor {
    pub name: String,
    pub subtitle: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetitorEdit {
    pub name: Option<String>,
    pub subtitle: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetitorImage {
    pub image: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub mode: Option<BracketMode>,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectWinnerRequest {
    pub round: usize,
    #[serde(rename = "match")]
    pub match_index: usize,
    pub competitor_id: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketCompetitorEdit {
    pub id: u32,
    pub name: Option<String>,
    pub subtitle: Option<String>,
}

/// Export toggles; unset fields fall back to the config defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequestBody {
    pub theme: Option<String>,
    pub show_champion: Option<bool>,
    pub show_subtitles: Option<bool>,
    pub particles: Option<bool>,
    pub vignette: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportNotice {
    pub notice: String,
}

// ── Config types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub port: u16,
    pub static_dir: String,
    pub default_mode: BracketMode,
    pub seed: Option<u64>,
    pub theme: String,
    pub show_champion: bool,
    pub show_subtitles: bool,
    pub particles: bool,
    pub vignette: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            static_dir: "web".to_string(),
            default_mode: BracketMode::Manual,
            seed: None,
            theme: DEFAULT_THEME.to_string(),
            show_champion: true,
            show_subtitles: true,
            particles: false,
            vignette: true,
        }
    }
}
