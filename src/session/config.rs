use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::SessionSettings;
use crate::error::SessionError;
use crate::video::VideoInfo;

const UNNAMED: &str = "unnamed";

/// Everything the operator supplies when starting a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub video_path: PathBuf,
    pub trainee: String,
    pub trainer: String,
    pub bed: String,
    pub case: String,
    pub down_ratio: u64,
    pub manual_window_ratio: u32,
    pub save_folder: PathBuf,
}

impl SessionConfig {
    pub fn new(video_path: impl Into<PathBuf>, settings: &SessionSettings) -> Self {
        Self {
            video_path: video_path.into(),
            trainee: String::new(),
            trainer: String::new(),
            bed: String::new(),
            case: String::new(),
            down_ratio: settings.down_ratio,
            manual_window_ratio: settings.manual_window_ratio,
            save_folder: settings.save_folder.clone(),
        }
    }

    pub fn trainee(mut self, trainee: impl Into<String>) -> Self {
        self.trainee = trainee.into();
        self
    }

    pub fn trainer(mut self, trainer: impl Into<String>) -> Self {
        self.trainer = trainer.into();
        self
    }

    pub fn bed(mut self, bed: impl Into<String>) -> Self {
        self.bed = bed.into();
        self
    }

    pub fn case(mut self, case: impl Into<String>) -> Self {
        self.case = case.into();
        self
    }

    pub fn down_ratio(mut self, down_ratio: u64) -> Self {
        self.down_ratio = down_ratio;
        self
    }

    pub fn manual_window_ratio(mut self, ratio: u32) -> Self {
        self.manual_window_ratio = ratio;
        self
    }

    pub fn save_folder(mut self, save_folder: impl Into<PathBuf>) -> Self {
        self.save_folder = save_folder.into();
        self
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.down_ratio == 0 {
            return Err(SessionError::InvalidConfig(
                "down_ratio must be at least 1".to_string(),
            ));
        }
        if self.video_path.as_os_str().is_empty() {
            return Err(SessionError::InvalidConfig(
                "no input video selected".to_string(),
            ));
        }
        Ok(())
    }
}

/// Names as they appear in the log. Blank entries become `unnamed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participants {
    pub trainee: String,
    pub trainer: String,
    pub bed: String,
    pub case: String,
}

fn or_unnamed(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        UNNAMED.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Keeps identifiers safe to embed in a file name.
fn file_component(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// One recording run, fixed at start.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub run_id: Uuid,
    pub started_at: DateTime<Local>,
    pub input_path: PathBuf,
    pub save_folder: PathBuf,
    pub video_path: PathBuf,
    pub info: VideoInfo,
    pub down_ratio: u64,
    pub override_window: u32,
    pub participants: Participants,
}

impl Session {
    pub fn new(config: &SessionConfig, info: VideoInfo, started_at: DateTime<Local>) -> Self {
        let participants = Participants {
            trainee: or_unnamed(&config.trainee),
            trainer: or_unnamed(&config.trainer),
            bed: or_unnamed(&config.bed),
            case: or_unnamed(&config.case),
        };
        let id = format!(
            "{}_{}_{}",
            file_component(&participants.case),
            file_component(&participants.trainee),
            started_at.format("%Y%m%d_%H%M%S")
        );
        let video_path = config.save_folder.join(format!("{id}.avi"));
        let override_window = info
            .nominal_fps()
            .saturating_mul(config.manual_window_ratio)
            .max(1);

        Self {
            id,
            run_id: Uuid::new_v4(),
            started_at,
            input_path: config.video_path.clone(),
            save_folder: config.save_folder.clone(),
            video_path,
            info,
            down_ratio: config.down_ratio,
            override_window,
            participants,
        }
    }

    /// Log file path for a flush at `closed_at`.
    pub fn log_path(&self, closed_at: DateTime<Local>) -> PathBuf {
        self.save_folder.join(format!(
            "{}_{}.csv",
            self.id,
            closed_at.format("%H-%M-%S")
        ))
    }

    /// Appends `_2`, `_3`, ... to the id until neither its video nor any of
    /// its logs exist in the save folder. Sessions started within the same
    /// second otherwise share their output paths.
    pub fn claim_unused_id(mut self) -> Self {
        let base = self.id.clone();
        let mut attempt = 1;
        while outputs_exist(&self.save_folder, &self.id) {
            attempt += 1;
            self.id = format!("{base}_{attempt}");
        }
        self.video_path = self.save_folder.join(format!("{}.avi", self.id));
        self
    }

    pub fn is_sampled(&self, frame_index: u64) -> bool {
        frame_index % self.down_ratio == 0
    }

    pub fn save_folder(&self) -> &Path {
        &self.save_folder
    }
}

fn outputs_exist(folder: &Path, id: &str) -> bool {
    if folder.join(format!("{id}.avi")).exists() {
        return true;
    }
    let Ok(entries) = fs::read_dir(folder) else {
        return false;
    };
    entries
        .filter_map(Result::ok)
        .any(|entry| is_log_of(&entry.file_name().to_string_lossy(), id))
}

/// Matches `{id}_HH-MM-SS.csv`.
fn is_log_of(file_name: &str, id: &str) -> bool {
    file_name
        .strip_prefix(id)
        .and_then(|rest| rest.strip_prefix('_'))
        .and_then(|rest| rest.strip_suffix(".csv"))
        .is_some_and(|time| {
            time.len() == 8
                && time.bytes().enumerate().all(|(i, b)| match i {
                    2 | 5 => b == b'-',
                    _ => b.is_ascii_digit(),
                })
        })
}
