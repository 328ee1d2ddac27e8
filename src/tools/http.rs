use std::time::Duration;

use serde_json::Value;
use tracing::debug;
use ureq::{self, Agent};

const USER_AGENT: &str = "econ-swarm/0.1";

fn agent(timeout: Duration) -> Agent {
    let config = Agent::config_builder()
        .timeout_global(Some(timeout))
        .build();

    config.into()
}

/// Send a GET request and return the response body as a string.
pub fn get_text(url: &str, timeout: Duration) -> Result<String, ureq::Error> {
    debug!(url, "GET");
    let body: String = agent(timeout)
        .get(url)
        .header("User-Agent", USER_AGENT)
        .call()?
        .body_mut()
        .read_to_string()?;

    Ok(body)
}

/// POST a JSON body with extra headers and decode the JSON response.
pub fn post_json(
    url: &str,
    headers: &[(&str, &str)],
    body: &Value,
    timeout: Duration,
) -> Result<Value, ureq::Error> {
    debug!(url, "POST");
    let mut request = agent(timeout).post(url).header("User-Agent", USER_AGENT);
    for (name, value) in headers {
        request = request.header(*name, *value);
    }

    let response: Value = request.send_json(body)?.body_mut().read_json()?;

    Ok(response)
}
