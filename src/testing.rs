//! Shared fixtures for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::client::{AdviceRequest, Backend, ClientError};

/// Replays canned replies in order and records what it was asked.
#[derive(Default)]
pub(crate) struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<Value, ClientError>>>,
    requests: Mutex<Vec<AdviceRequest>>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub(crate) fn new(replies: Vec<Result<Value, ClientError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        }
    }

    pub(crate) fn replying(values: Vec<Value>) -> Self {
        Self::new(values.into_iter().map(Ok).collect())
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<AdviceRequest> {
        self.requests.lock().clone()
    }
}

impl Backend for ScriptedBackend {
    async fn submit(&self, request: &AdviceRequest) -> Result<Value, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(ClientError::Server("no scripted reply left".into())))
    }
}

pub(crate) fn weather_json() -> Value {
    json!({
        "temperature_data": {
            "current": 31.5,
            "forecast": [
                { "time": "2026-10-15 12:00:00", "temp": 31.5 },
                { "time": "2026-10-15 15:00:00", "temp": 33.0 }
            ],
            "max": 33.0,
            "min": 24.2,
            "avg": 28.7,
            "trend": "rising"
        },
        "humidity_data": {
            "current": 64,
            "forecast": [
                { "time": "2026-10-15 12:00:00", "humidity": 64 },
                { "time": "2026-10-15 15:00:00", "humidity": 58 }
            ],
            "high_humidity_hours": 9,
            "trend": "falling"
        },
        "weather_conditions": {
            "current": "scattered clouds",
            "forecast": [
                { "time": "2026-10-15 12:00:00", "condition": "scattered clouds" },
                { "time": "2026-10-15 15:00:00", "condition": "light rain" }
            ],
            "precipitation_probability": 37.5
        },
        "water_management": {
            "temperature": 31.5,
            "humidity": 64,
            "wind_speed": 3.6,
            "conditions": "scattered clouds"
        },
        "historical_patterns": {
            "total_rainfall": 1.2,
            "temp_range": { "min": 24.2, "max": 33.0 },
            "temp_trend": "rising"
        }
    })
}
