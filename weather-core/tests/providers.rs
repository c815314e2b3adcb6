//! Provider clients against a mock HTTP server.

use std::time::Duration;

use chrono::NaiveDate;
use reqwest::Client;
use weather_core::{
    ProviderError, ProviderId, RetryPolicy, WeatherProvider,
    model::fields,
    provider::{openweather::OpenWeatherProvider, weatherapi::WeatherApiProvider},
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(2, Duration::from_millis(10))
}

fn openweather(server: &MockServer) -> OpenWeatherProvider {
    OpenWeatherProvider::new("OW_KEY".to_string(), Client::new())
        .with_base_url(server.uri())
        .with_retry(fast_retry())
}

fn weatherapi(server: &MockServer) -> WeatherApiProvider {
    WeatherApiProvider::new("WA_KEY".to_string(), Client::new())
        .with_base_url(server.uri())
        .with_retry(fast_retry())
}

fn weatherapi_current_body() -> serde_json::Value {
    serde_json::json!({
        "location": { "name": "London", "country": "United Kingdom", "lat": 51.52, "lon": -0.11 },
        "current": {
            "temp_c": 16.0,
            "feelslike_c": 15.2,
            "humidity": 72,
            "wind_kph": 18.0,
            "condition": { "text": "Light rain" }
        }
    })
}

#[tokio::test]
async fn openweather_current_is_normalized() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data/2.5/weather"))
        .and(query_param("q", "berlin"))
        .and(query_param("appid", "OW_KEY"))
        .and(query_param("units", "metric"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "coord": { "lon": 13.41, "lat": 52.52 },
            "weather": [{ "main": "Rain", "description": "light rain" }],
            "main": { "temp": 17.0, "feels_like": 16.4, "humidity": 70 },
            "wind": { "speed": 4.1 },
            "sys": { "country": "DE" },
            "name": "Berlin",
            "dt": 1758920400
        })))
        .expect(1)
        .mount(&server)
        .await;

    let result = openweather(&server).current("berlin").await.unwrap();

    assert_eq!(result.provider, ProviderId::OpenWeather);
    let location = result.location.unwrap();
    assert_eq!(location.name, "Berlin, DE");
    assert_eq!(location.lat, Some(52.52));
    assert_eq!(result.numeric_fields[fields::TEMPERATURE_C], 17.0);
    assert_eq!(result.numeric_fields[fields::FEELS_LIKE_C], 16.4);
    assert_eq!(result.numeric_fields[fields::HUMIDITY_PCT], 70.0);
    assert_eq!(result.categorical_fields[fields::CONDITION], "light rain");
    assert_eq!(result.raw_payload["name"], "Berlin");
}

#[tokio::test]
async fn openweather_feels_like_falls_back_to_temperature() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data/2.5/weather"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "weather": [],
            "main": { "temp": 9.5 },
            "name": "Nowhere"
        })))
        .mount(&server)
        .await;

    let result = openweather(&server).current("nowhere").await.unwrap();

    assert_eq!(result.numeric_fields[fields::FEELS_LIKE_C], 9.5);
    assert!(!result.categorical_fields.contains_key(fields::CONDITION));
    assert!(!result.numeric_fields.contains_key(fields::HUMIDITY_PCT));
}

#[tokio::test]
async fn weatherapi_forecast_is_keyed_by_date() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/forecast.json"))
        .and(query_param("key", "WA_KEY"))
        .and(query_param("days", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "location": { "name": "Hyderabad", "country": "India", "lat": 17.38, "lon": 78.47 },
            "forecast": { "forecastday": [
                { "date": "2025-09-26", "day": {
                    "maxtemp_c": 31.0, "mintemp_c": 23.0, "avgtemp_c": 26.4, "avghumidity": 80,
                    "condition": { "text": "Patchy rain nearby" } } },
                { "date": "2025-09-27", "day": {
                    "maxtemp_c": 30.0, "mintemp_c": 22.5, "avgtemp_c": 25.9,
                    "condition": { "text": "Moderate rain" } } }
            ]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let result = weatherapi(&server).forecast("hyderabad", 2).await.unwrap();

    assert_eq!(result.daily.len(), 2);
    let first = &result.daily[0];
    assert_eq!(first.date, NaiveDate::from_ymd_opt(2025, 9, 26).unwrap());
    assert_eq!(first.numeric_fields[fields::MIN_C], 23.0);
    assert_eq!(first.numeric_fields[fields::MAX_C], 31.0);
    assert_eq!(first.numeric_fields[fields::AVG_C], 26.4);
    assert_eq!(first.categorical_fields[fields::CONDITION], "Patchy rain nearby");
    assert!(!result.daily[1].numeric_fields.contains_key(fields::HUMIDITY_PCT));
}

#[tokio::test]
async fn empty_forecast_is_a_data_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/forecast.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "location": { "name": "X", "country": "Y" },
            "forecast": { "forecastday": [] }
        })))
        .mount(&server)
        .await;

    let err = weatherapi(&server).forecast("x", 3).await.unwrap_err();
    assert!(matches!(err, ProviderError::Data { provider: ProviderId::WeatherApi, .. }));
}

#[tokio::test]
async fn transient_failure_is_retried_once() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/current.json"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/current.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(weatherapi_current_body()))
        .expect(1)
        .mount(&server)
        .await;

    let result = weatherapi(&server).current("london").await.unwrap();

    assert_eq!(result.numeric_fields[fields::TEMPERATURE_C], 16.0);
    assert_eq!(result.numeric_fields[fields::WIND_SPEED_MPS], 5.0);
    assert_eq!(result.location.unwrap().name, "London, United Kingdom");
}

#[tokio::test]
async fn second_transient_failure_makes_provider_unavailable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/current.json"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .expect(2)
        .mount(&server)
        .await;

    let err = weatherapi(&server).current("london").await.unwrap_err();

    match err {
        ProviderError::Unavailable { provider, message } => {
            assert_eq!(provider, ProviderId::WeatherApi);
            assert!(message.contains("502"), "unexpected message: {message}");
        }
        other => panic!("expected Unavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn timed_out_request_is_retried_then_unavailable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/current.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(weatherapi_current_body())
                .set_delay(Duration::from_millis(500)),
        )
        .expect(2)
        .mount(&server)
        .await;

    let http = Client::builder().timeout(Duration::from_millis(100)).build().unwrap();
    let provider = WeatherApiProvider::new("WA_KEY".to_string(), http)
        .with_base_url(server.uri())
        .with_retry(fast_retry());

    let err = provider.current("london").await.unwrap_err();

    match err {
        ProviderError::Unavailable { provider, message } => {
            assert_eq!(provider, ProviderId::WeatherApi);
            assert!(message.contains("timed out"), "unexpected message: {message}");
            assert!(!message.contains("WA_KEY"), "API key leaked: {message}");
        }
        other => panic!("expected Unavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn refused_connection_is_unavailable() {
    // Bind then release a port so nothing is listening on it.
    let addr = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
    let provider = OpenWeatherProvider::new("OW_KEY".to_string(), Client::new())
        .with_base_url(format!("http://{addr}"))
        .with_retry(fast_retry());

    let err = provider.current("berlin").await.unwrap_err();

    assert!(matches!(err, ProviderError::Unavailable { provider: ProviderId::OpenWeather, .. }));
    assert!(!err.to_string().contains("OW_KEY"), "API key leaked: {err}");
}

#[tokio::test]
async fn rate_limited_request_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/current.json"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/current.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(weatherapi_current_body()))
        .expect(1)
        .mount(&server)
        .await;

    let result = weatherapi(&server).current("london").await.unwrap();
    assert_eq!(result.numeric_fields[fields::TEMPERATURE_C], 16.0);
}

#[tokio::test]
async fn repeated_request_timeout_status_is_unavailable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data/2.5/weather"))
        .respond_with(ResponseTemplate::new(408))
        .expect(2)
        .mount(&server)
        .await;

    let err = openweather(&server).current("berlin").await.unwrap_err();
    assert!(matches!(err, ProviderError::Unavailable { .. }));
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data/2.5/weather"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "cod": "404", "message": "city not found"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = openweather(&server).current("atlantis").await.unwrap_err();

    assert!(matches!(err, ProviderError::Data { .. }));
    assert!(err.to_string().contains("city not found"));
}

#[tokio::test]
async fn malformed_body_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/current.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let err = weatherapi(&server).current("london").await.unwrap_err();
    assert!(matches!(err, ProviderError::Data { .. }));
}

#[tokio::test]
async fn missing_fields_are_a_data_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/current.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "location": { "name": "London", "country": "UK" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = weatherapi(&server).current("london").await.unwrap_err();
    assert!(err.to_string().contains("unexpected response shape"));
}

#[tokio::test]
async fn location_search_respects_limit() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/geo/1.0/direct"))
        .and(query_param("q", "Paris"))
        .and(query_param("limit", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "name": "Paris", "country": "FR", "lat": 48.8566, "lon": 2.3522 },
            { "name": "Paris", "country": "US", "lat": 33.66, "lon": -95.55 }
        ])))
        .mount(&server)
        .await;

    let found = openweather(&server).search("Paris", 1).await.unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "Paris, FR");
    assert_eq!(found[0].lon, Some(2.3522));
}

#[tokio::test]
async fn openweather_forecast_groups_steps_by_local_day() {
    let server = MockServer::start().await;

    // Hyderabad is UTC+5:30, so 20:00Z already belongs to the next local day.
    Mock::given(method("GET"))
        .and(path("/data/2.5/forecast"))
        .and(query_param("q", "hyderabad"))
        .and(query_param("cnt", "16"))
        .and(query_param("appid", "OW_KEY"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "city": {
                "name": "Hyderabad", "country": "IN", "timezone": 19800,
                "coord": { "lat": 17.38, "lon": 78.47 }
            },
            "list": [
                { "dt": 1758830400,
                  "main": { "temp": 24.0, "temp_min": 23.5, "temp_max": 24.5, "humidity": 80 },
                  "weather": [{ "description": "light rain" }] },
                { "dt": 1758852000,
                  "main": { "temp": 26.0, "temp_min": 25.0, "temp_max": 27.0, "humidity": 70 },
                  "weather": [{ "description": "light rain" }] },
                { "dt": 1758873600,
                  "main": { "temp": 30.0, "temp_min": 29.0, "temp_max": 31.0, "humidity": 60 },
                  "weather": [{ "description": "clear sky" }] },
                { "dt": 1758916800,
                  "main": { "temp": 22.0, "humidity": 90 },
                  "weather": [{ "description": "mist" }] }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let result = openweather(&server).forecast("hyderabad", 2).await.unwrap();

    assert_eq!(result.location.unwrap().name, "Hyderabad, IN");
    assert_eq!(result.daily.len(), 2);

    let first = &result.daily[0];
    assert_eq!(first.date, NaiveDate::from_ymd_opt(2025, 9, 26).unwrap());
    assert_eq!(first.numeric_fields[fields::MIN_C], 23.5);
    assert_eq!(first.numeric_fields[fields::MAX_C], 31.0);
    assert!((first.numeric_fields[fields::AVG_C] - 26.6667).abs() < 1e-3);
    assert_eq!(first.numeric_fields[fields::HUMIDITY_PCT], 70.0);
    assert_eq!(first.categorical_fields[fields::CONDITION], "light rain");

    let second = &result.daily[1];
    assert_eq!(second.date, NaiveDate::from_ymd_opt(2025, 9, 27).unwrap());
    assert_eq!(second.numeric_fields[fields::MIN_C], 22.0);
    assert_eq!(second.numeric_fields[fields::MAX_C], 22.0);
    assert_eq!(second.categorical_fields[fields::CONDITION], "mist");
}

#[tokio::test]
async fn openweather_forecast_without_steps_is_a_data_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data/2.5/forecast"))
        .and(query_param("cnt", "40"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "city": { "name": "Hyderabad", "country": "IN", "timezone": 19800 },
            "list": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = openweather(&server).forecast("hyderabad", 7).await.unwrap_err();

    assert!(matches!(err, ProviderError::Data { provider: ProviderId::OpenWeather, .. }));
    assert!(err.to_string().contains("no data"));
}
