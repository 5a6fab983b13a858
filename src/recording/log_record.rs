use chrono::{DateTime, Local};

use crate::common::{OperatorStatus, Phase};

pub const LOG_TIME_FORMAT: &str = "%d/%m/%Y-%H:%M:%S%.6f";

const NO_CORRECTION: &str = "--";

pub const HEADER: [&str; 11] = [
    "Time",
    "Frame",
    "Trainee",
    "Trainer",
    "Bed",
    "Case",
    "Status",
    "FPS",
    "Prediction",
    "Correction",
    "Combine",
];

/// One row of the session log, written for every sampled frame.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub timestamp: DateTime<Local>,
    pub frame_index: u64,
    pub trainee: String,
    pub trainer: String,
    pub bed: String,
    pub case: String,
    pub status: OperatorStatus,
    /// Inference rate in frames per second.
    pub rate: f64,
    pub inferred: Phase,
    pub manual: Option<Phase>,
}

impl LogRecord {
    /// The correction when there is one, else the prediction.
    pub fn combined(&self) -> Phase {
        self.manual.unwrap_or(self.inferred)
    }

    pub fn fields(&self) -> [String; 11] {
        [
            self.timestamp.format(LOG_TIME_FORMAT).to_string(),
            format!("{:07}", self.frame_index),
            self.trainee.clone(),
            self.trainer.clone(),
            self.bed.clone(),
            self.case.clone(),
            self.status.label().to_string(),
            format!("{:.4}", self.rate),
            self.inferred.label().to_string(),
            self.manual
                .map(|phase| phase.label().to_string())
                .unwrap_or_else(|| NO_CORRECTION.to_string()),
            self.combined().label().to_string(),
        ]
    }

    pub fn csv_row(&self) -> String {
        join_row(self.fields().iter().map(String::as_str))
    }
}

pub fn header_row() -> String {
    join_row(HEADER.iter().copied())
}

fn join_row<'a>(fields: impl Iterator<Item = &'a str>) -> String {
    fields.map(quote_field).collect::<Vec<_>>().join(",")
}

fn quote_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// `1 / elapsed`, with elapsed rounded to milliseconds and floored at 1ms.
pub fn inference_rate(elapsed_secs: f64) -> f64 {
    let rounded = (elapsed_secs * 1000.0).round() / 1000.0;
    1.0 / rounded.max(0.001)
}
