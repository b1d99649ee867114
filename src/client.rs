//! Requests to the advice service and interpretation of its JSON replies.

use std::future::Future;
use std::path::Path;

use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::AdvisorConfig;
pub use crate::error::ClientError;
use crate::page;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Endpoint {
    Advice,
    WaterManagement,
    CropImage,
    Disease,
    BioFertilizer,
    Schemes,
    Weather,
}

impl Endpoint {
    pub const ALL: [Endpoint; 7] = [
        Endpoint::Advice,
        Endpoint::WaterManagement,
        Endpoint::CropImage,
        Endpoint::Disease,
        Endpoint::BioFertilizer,
        Endpoint::Schemes,
        Endpoint::Weather,
    ];

    pub fn path(self) -> &'static str {
        match self {
            Endpoint::Advice => "/get-advice",
            Endpoint::WaterManagement => "/water-management",
            Endpoint::CropImage => "/analyze-image",
            Endpoint::Disease => "/analyze-disease",
            Endpoint::BioFertilizer => "/bio-fertilizer",
            Endpoint::Schemes => "/schemes",
            Endpoint::Weather => "/weather",
        }
    }

    /// Page region the formatted reply is revealed into.
    pub fn result_region(self) -> &'static str {
        match self {
            Endpoint::Advice => page::ADVICE_REGION,
            Endpoint::WaterManagement => page::WATER_REGION,
            Endpoint::CropImage => page::IMAGE_REGION,
            Endpoint::Disease => page::DISEASE_REGION,
            Endpoint::BioFertilizer => page::BIO_FERTILIZER_REGION,
            Endpoint::Schemes => page::SCHEMES_REGION,
            Endpoint::Weather => page::CONDITIONS_REGION,
        }
    }

    /// Last section the service's answer template asks for. A reply without
    /// it was most likely cut off by the model's token limit.
    pub fn closing_section(self) -> Option<&'static str> {
        match self {
            Endpoint::Advice => Some("Related Topics"),
            Endpoint::CropImage => Some("Additional Tips"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub mime: Option<String>,
}

impl ImageUpload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let mime = mime_for(&file_name).map(str::to_string);
        Self {
            file_name,
            bytes,
            mime,
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        Ok(Self::new(file_name, bytes))
    }

    fn to_part(&self) -> Result<Part, ClientError> {
        let part = Part::bytes(self.bytes.clone()).file_name(self.file_name.clone());
        match self.mime.as_deref() {
            Some(mime) if !mime.trim().is_empty() => Ok(part.mime_str(mime)?),
            _ => Ok(part),
        }
    }
}

fn mime_for(file_name: &str) -> Option<&'static str> {
    let extension = Path::new(file_name)
        .extension()?
        .to_str()?
        .to_ascii_lowercase();
    match extension.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}

/// One submission, with the user's raw input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdviceRequest {
    Advice {
        question: String,
    },
    WaterManagement {
        crop_type: String,
        soil_type: String,
        language: Option<String>,
    },
    CropImage {
        image: Option<ImageUpload>,
    },
    Disease {
        image: Option<ImageUpload>,
    },
    BioFertilizer {
        crop_type: String,
        soil_type: String,
        growth_stage: String,
        language: Option<String>,
    },
    Schemes {
        state: String,
        category: String,
    },
    Weather {
        city: String,
    },
}

fn missing(value: &str) -> bool {
    value.trim().is_empty()
}

impl AdviceRequest {
    pub fn endpoint(&self) -> Endpoint {
        match self {
            AdviceRequest::Advice { .. } => Endpoint::Advice,
            AdviceRequest::WaterManagement { .. } => Endpoint::WaterManagement,
            AdviceRequest::CropImage { .. } => Endpoint::CropImage,
            AdviceRequest::Disease { .. } => Endpoint::Disease,
            AdviceRequest::BioFertilizer { .. } => Endpoint::BioFertilizer,
            AdviceRequest::Schemes { .. } => Endpoint::Schemes,
            AdviceRequest::Weather { .. } => Endpoint::Weather,
        }
    }

    /// Presence checks only; nothing is sent when this fails.
    pub fn validate(&self) -> Result<(), ClientError> {
        let problem = match self {
            AdviceRequest::Advice { question } if missing(question) => {
                Some("Please enter your question")
            }
            AdviceRequest::WaterManagement {
                crop_type,
                soil_type,
                ..
            } if missing(crop_type) || missing(soil_type) => Some("Please fill in all fields"),
            AdviceRequest::CropImage { image } | AdviceRequest::Disease { image }
                if image.as_ref().is_none_or(|image| image.bytes.is_empty()) =>
            {
                Some("Please select an image")
            }
            AdviceRequest::BioFertilizer {
                crop_type,
                soil_type,
                growth_stage,
                ..
            } if missing(crop_type) || missing(soil_type) || missing(growth_stage) => {
                Some("Please fill in all fields")
            }
            AdviceRequest::Schemes { state, category } if missing(state) || missing(category) => {
                Some("Please select both state and category")
            }
            AdviceRequest::Weather { city } if missing(city) => Some("Please enter a city name"),
            _ => None,
        };
        match problem {
            Some(message) => Err(ClientError::validation(message)),
            None => Ok(()),
        }
    }

    /// Form-encoded fields; empty for image uploads.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = Vec::new();
        match self {
            AdviceRequest::Advice { question } => fields.push(("question", question.clone())),
            AdviceRequest::WaterManagement {
                crop_type,
                soil_type,
                language,
            } => {
                fields.push(("crop_type", crop_type.clone()));
                fields.push(("soil_type", soil_type.clone()));
                push_language(&mut fields, language.as_deref());
            }
            AdviceRequest::BioFertilizer {
                crop_type,
                soil_type,
                growth_stage,
                language,
            } => {
                fields.push(("crop_type", crop_type.clone()));
                fields.push(("soil_type", soil_type.clone()));
                fields.push(("growth_stage", growth_stage.clone()));
                push_language(&mut fields, language.as_deref());
            }
            AdviceRequest::Schemes { state, category } => {
                fields.push(("state", state.clone()));
                fields.push(("category", category.clone()));
            }
            AdviceRequest::Weather { city } => fields.push(("city", city.clone())),
            AdviceRequest::CropImage { .. } | AdviceRequest::Disease { .. } => {}
        }
        fields
    }

    pub fn image(&self) -> Option<&ImageUpload> {
        match self {
            AdviceRequest::CropImage { image } | AdviceRequest::Disease { image } => {
                image.as_ref()
            }
            _ => None,
        }
    }
}

fn push_language(fields: &mut Vec<(&'static str, String)>, language: Option<&str>) {
    if let Some(language) = language.filter(|value| !value.trim().is_empty()) {
        fields.push(("language", language.to_string()));
    }
}

/// Anything that can answer an [`AdviceRequest`] with the service's JSON.
pub trait Backend: Send + Sync {
    fn submit(
        &self,
        request: &AdviceRequest,
    ) -> impl Future<Output = Result<Value, ClientError>> + Send;
}

/// The real service over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpBackend {
    pub fn new(config: &AdvisorConfig) -> Result<Self, ClientError> {
        let mut base_url = Url::parse(&config.base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { http, base_url })
    }

    pub fn endpoint_url(&self, endpoint: Endpoint) -> Result<Url, ClientError> {
        Ok(self
            .base_url
            .join(endpoint.path().trim_start_matches('/'))?)
    }
}

impl Backend for HttpBackend {
    async fn submit(&self, request: &AdviceRequest) -> Result<Value, ClientError> {
        let url = self.endpoint_url(request.endpoint())?;
        debug!(%url, "posting request");
        let builder = self.http.post(url);
        let builder = match request.image() {
            Some(image) => builder.multipart(Form::new().part("image", image.to_part()?)),
            None => builder.form(&request.form_fields()),
        };
        let response = builder.send().await?;
        // Error replies carry a JSON `error` body, so the status is only context.
        let status = response.status();
        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|err| ClientError::Decode(format!("HTTP {status}: {err}")))
    }
}

/// A successful reply, by endpoint shape.
#[derive(Debug, Clone, PartialEq)]
pub enum AdviceResponse {
    Text(String),
    CropAnalysis {
        crop_identified: String,
        sustainable_advice: String,
    },
    Diagnosis(String),
    Weather(WeatherReport),
}

impl AdviceResponse {
    /// The text fed to the formatter; `None` for weather, which renders as cards.
    pub fn display_text(&self) -> Option<String> {
        match self {
            AdviceResponse::Text(text) => Some(text.clone()),
            AdviceResponse::CropAnalysis {
                crop_identified,
                sustainable_advice,
            } => Some(format!(
                "# Crop Identified\n{crop_identified}\n\n{sustainable_advice}"
            )),
            AdviceResponse::Diagnosis(diagnosis) => {
                Some(format!("# Disease Analysis Results\n{diagnosis}"))
            }
            AdviceResponse::Weather(_) => None,
        }
    }
}

/// Surfaces a truthy `error` field, otherwise picks out the endpoint's payload.
pub fn interpret(endpoint: Endpoint, value: Value) -> Result<AdviceResponse, ClientError> {
    if let Some(message) = error_message(&value) {
        return Err(ClientError::Server(message));
    }
    match endpoint {
        Endpoint::Advice | Endpoint::WaterManagement | Endpoint::BioFertilizer => {
            text_field(&value, "advice").map(AdviceResponse::Text)
        }
        Endpoint::Schemes => text_field(&value, "schemes").map(AdviceResponse::Text),
        Endpoint::CropImage => Ok(AdviceResponse::CropAnalysis {
            crop_identified: text_field(&value, "crop_identified")?,
            sustainable_advice: text_field(&value, "sustainable_advice")?,
        }),
        Endpoint::Disease => text_field(&value, "diagnosis").map(AdviceResponse::Diagnosis),
        Endpoint::Weather => Ok(AdviceResponse::Weather(serde_json::from_value(value)?)),
    }
}

fn error_message(value: &Value) -> Option<String> {
    match value.get("error")? {
        Value::Null | Value::Bool(false) => None,
        Value::String(message) if message.is_empty() => None,
        Value::String(message) => Some(message.clone()),
        Value::Number(number) if number.as_f64() == Some(0.0) => None,
        other => Some(other.to_string()),
    }
}

fn text_field(value: &Value, field: &str) -> Result<String, ClientError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ClientError::Decode(format!("response is missing `{field}`")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Rising,
    Falling,
    #[default]
    #[serde(other)]
    Unknown,
}

impl Trend {
    pub fn is_rising(self) -> bool {
        self == Trend::Rising
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub temperature_data: TemperatureData,
    pub humidity_data: HumidityData,
    pub weather_conditions: WeatherConditions,
    pub water_management: WaterManagement,
    #[serde(default)]
    pub historical_patterns: Option<HistoricalPatterns>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureData {
    pub current: f64,
    #[serde(default)]
    pub forecast: Vec<TemperaturePoint>,
    pub max: f64,
    pub min: f64,
    #[serde(default)]
    pub avg: f64,
    #[serde(default)]
    pub trend: Trend,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperaturePoint {
    pub time: String,
    pub temp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumidityData {
    pub current: f64,
    #[serde(default)]
    pub forecast: Vec<HumidityPoint>,
    #[serde(default)]
    pub high_humidity_hours: u32,
    #[serde(default)]
    pub trend: Trend,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumidityPoint {
    pub time: String,
    pub humidity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherConditions {
    pub current: String,
    #[serde(default)]
    pub forecast: Vec<ConditionPoint>,
    #[serde(default)]
    pub precipitation_probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionPoint {
    pub time: String,
    pub condition: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WaterManagement {
    pub temperature: f64,
    pub humidity: f64,
    pub wind_speed: f64,
    pub conditions: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoricalPatterns {
    pub total_rainfall: f64,
    pub temp_trend: Trend,
}
