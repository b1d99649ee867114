use crate::client::{Trend, WeatherReport};
use crate::format::escape_html;

/// Card markup for each weather region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeatherCards {
    pub temperature: String,
    pub humidity: String,
    pub conditions: String,
    pub forecast: String,
}

impl WeatherCards {
    pub fn from_report(report: &WeatherReport) -> Self {
        Self {
            temperature: temperature_card(report),
            humidity: humidity_card(report),
            conditions: conditions_card(report),
            forecast: forecast_list(report),
        }
    }
}

fn trend_line(trend: Trend) -> String {
    let (arrow, class) = if trend.is_rising() {
        ("up", "trend-up")
    } else {
        ("down", "trend-down")
    };
    let label = match trend {
        Trend::Rising => "rising",
        Trend::Falling => "falling",
        Trend::Unknown => "unknown",
    };
    format!(
        r#"<div class="weather-trend"><i class="bi bi-arrow-{arrow} {class}"></i> Trend: {label}</div>"#
    )
}

fn temperature_card(report: &WeatherReport) -> String {
    let data = &report.temperature_data;
    format!(
        r#"<div class="weather-value">{}°C</div>{}<small>Range: {}°C - {}°C</small>"#,
        data.current,
        trend_line(data.trend),
        data.min,
        data.max
    )
}

fn humidity_card(report: &WeatherReport) -> String {
    let data = &report.humidity_data;
    format!(
        r#"<div class="weather-value">{}%</div>{}<small>High humidity: {}h</small>"#,
        data.current,
        trend_line(data.trend),
        data.high_humidity_hours
    )
}

fn conditions_card(report: &WeatherReport) -> String {
    let conditions = &report.weather_conditions;
    format!(
        r#"<div class="weather-value">{}</div><div class="weather-trend"><i class="bi bi-cloud-rain"></i> Rain chance: {}%</div><small>Wind: {} m/s</small>"#,
        escape_html(&conditions.current),
        conditions.precipitation_probability,
        report.water_management.wind_speed
    )
}

/// One row per forecast slot, joining the three forecast series by time.
fn forecast_list(report: &WeatherReport) -> String {
    let rows: String = report
        .temperature_data
        .forecast
        .iter()
        .map(|point| {
            let humidity = report
                .humidity_data
                .forecast
                .iter()
                .find(|h| h.time == point.time)
                .map(|h| format!(", {}%", h.humidity))
                .unwrap_or_default();
            let condition = report
                .weather_conditions
                .forecast
                .iter()
                .find(|c| c.time == point.time)
                .map(|c| format!(", {}", escape_html(&c.condition)))
                .unwrap_or_default();
            format!(
                r#"<li class="list-group-item">{}: {}°C{humidity}{condition}</li>"#,
                escape_html(&point.time),
                point.temp
            )
        })
        .collect();
    format!(r#"<ul class="list-group">{rows}</ul>"#)
}
