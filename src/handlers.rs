//! Form submission handlers: validate, call the service, show the answer.

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::client::{AdviceRequest, AdviceResponse, Backend, ClientError, ImageUpload, interpret};
use crate::format::{Fragment, format_response};
use crate::page::{
    ADVICE_REGION, CONDITIONS_REGION, FORECAST_REGION, HUMIDITY_REGION, Page, TEMPERATURE_REGION,
};
use crate::reveal::{RequestContext, RevealOutcome, Revealer};
use crate::weather::WeatherCards;

#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    /// The reply went through the formatter and revealer.
    Revealed {
        outcome: RevealOutcome,
        fragments: Vec<Fragment>,
    },
    /// Weather cards were written directly.
    Weather(crate::client::WeatherReport),
    /// Input failed presence checks; nothing was sent.
    Rejected(String),
    /// The request failed or the service reported an error.
    Failed(String),
}

impl HandlerOutcome {
    pub fn error_message(&self) -> Option<&str> {
        match self {
            HandlerOutcome::Rejected(message) | HandlerOutcome::Failed(message) => Some(message),
            _ => None,
        }
    }
}

pub struct Handlers<B> {
    backend: B,
    page: Page,
    revealer: Revealer,
    last_region: Mutex<Option<&'static str>>,
}

impl<B: Backend> Handlers<B> {
    pub fn new(backend: B, page: Page, revealer: Revealer) -> Self {
        Self {
            backend,
            page,
            revealer,
            last_region: Mutex::new(None),
        }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub async fn get_advice(&self, question: &str) -> HandlerOutcome {
        self.submit(AdviceRequest::Advice {
            question: question.to_string(),
        })
        .await
    }

    pub async fn water_advice(
        &self,
        crop_type: &str,
        soil_type: &str,
        language: Option<&str>,
    ) -> HandlerOutcome {
        self.submit(AdviceRequest::WaterManagement {
            crop_type: crop_type.to_string(),
            soil_type: soil_type.to_string(),
            language: language.map(str::to_string),
        })
        .await
    }

    pub async fn analyze_image(&self, image: Option<ImageUpload>) -> HandlerOutcome {
        self.submit(AdviceRequest::CropImage { image }).await
    }

    pub async fn analyze_disease(&self, image: Option<ImageUpload>) -> HandlerOutcome {
        self.submit(AdviceRequest::Disease { image }).await
    }

    pub async fn bio_fertilizer_advice(
        &self,
        crop_type: &str,
        soil_type: &str,
        growth_stage: &str,
        language: Option<&str>,
    ) -> HandlerOutcome {
        self.submit(AdviceRequest::BioFertilizer {
            crop_type: crop_type.to_string(),
            soil_type: soil_type.to_string(),
            growth_stage: growth_stage.to_string(),
            language: language.map(str::to_string),
        })
        .await
    }

    pub async fn scheme_info(&self, state: &str, category: &str) -> HandlerOutcome {
        self.submit(AdviceRequest::Schemes {
            state: state.to_string(),
            category: category.to_string(),
        })
        .await
    }

    pub async fn weather(&self, city: &str) -> HandlerOutcome {
        self.submit(AdviceRequest::Weather {
            city: city.to_string(),
        })
        .await
    }

    pub async fn submit(&self, request: AdviceRequest) -> HandlerOutcome {
        let endpoint = request.endpoint();
        if let Err(err) = request.validate() {
            let message = err.to_string();
            self.page.show_error(message.clone());
            return HandlerOutcome::Rejected(message);
        }

        info!(endpoint = endpoint.path(), "submitting request");
        self.page.show_loading();
        let outcome = match self.fetch_and_render(request).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(endpoint = endpoint.path(), error = %err, "request failed");
                let message = err.to_string();
                self.page.show_error(message.clone());
                HandlerOutcome::Failed(message)
            }
        };
        self.page.hide_loading();
        outcome
    }

    async fn fetch_and_render(&self, request: AdviceRequest) -> Result<HandlerOutcome, ClientError> {
        let endpoint = request.endpoint();
        let value = self.backend.submit(&request).await?;
        let text = match interpret(endpoint, value)? {
            AdviceResponse::Weather(report) => {
                self.show_weather(&report);
                return Ok(HandlerOutcome::Weather(report));
            }
            response => response.display_text().unwrap_or_default(),
        };

        let ctx = RequestContext::new(request);
        let text = self.revealer.settle(&self.backend, &ctx, text).await;
        let fragments = format_response(&text);
        let region = endpoint.result_region();
        *self.last_region.lock() = Some(region);
        let outcome = self.revealer.display(&self.page, region, &fragments).await;
        Ok(HandlerOutcome::Revealed { outcome, fragments })
    }

    fn show_weather(&self, report: &crate::client::WeatherReport) {
        let cards = WeatherCards::from_report(report);
        self.page.set_region_html(TEMPERATURE_REGION, cards.temperature);
        self.page.set_region_html(HUMIDITY_REGION, cards.humidity);
        self.page.set_region_html(CONDITIONS_REGION, cards.conditions);
        self.page.set_region_html(FORECAST_REGION, cards.forecast);
    }

    /// Plain text of the region the latest reply was revealed into, for the
    /// clipboard. Falls back to the advice region before any reply.
    pub fn copy_response(&self) -> Option<String> {
        let region = self.last_region.lock().unwrap_or(ADVICE_REGION);
        let text = self
            .page
            .region_text(region)
            .filter(|text| !text.trim().is_empty());
        match &text {
            Some(_) => self.page.show_toast("Advice copied to clipboard!"),
            None => self.page.show_toast("Nothing to copy yet"),
        }
        text
    }
}
