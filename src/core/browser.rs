use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use fantoccini::elements::Element;
use fantoccini::key::Key;
use fantoccini::{Client, ClientBuilder, Locator};
use reqwest::header::COOKIE;
use serde_json::json;

use super::errors::CoreError;
use super::portal::{ControlDescriptor, Portal};

pub struct WebDriverPortal {
    client: Client,
    http: reqwest::Client,
}

impl WebDriverPortal {
    pub async fn connect(
        webdriver_url: &str,
        headless: bool,
        http: reqwest::Client,
    ) -> anyhow::Result<Self> {
        let mut capabilities = serde_json::Map::new();
        let chrome_args: Vec<&str> = if headless {
            vec!["--headless=new", "--window-size=1366,900"]
        } else {
            vec!["--window-size=1366,900"]
        };
        let firefox_args: Vec<&str> = if headless { vec!["-headless"] } else { Vec::new() };
        capabilities.insert("goog:chromeOptions".to_string(), json!({ "args": chrome_args }));
        capabilities.insert("moz:firefoxOptions".to_string(), json!({ "args": firefox_args }));

        let client = ClientBuilder::native()
            .capabilities(capabilities)
            .connect(webdriver_url)
            .await
            .with_context(|| format!("failed to start a WebDriver session at {webdriver_url}"))?;

        Ok(Self { client, http })
    }

    async fn matching(&self, control: &ControlDescriptor) -> anyhow::Result<Vec<Element>> {
        let found = self.client.find_all(Locator::Css(&control.css)).await?;
        if control.text.is_none() {
            return Ok(found);
        }

        let mut matching = Vec::with_capacity(found.len());
        for element in found {
            let text = element.text().await.unwrap_or_default();
            if control.matches_text(&text) {
                matching.push(element);
            }
        }
        Ok(matching)
    }

    async fn nth(&self, control: &ControlDescriptor, nth: usize) -> anyhow::Result<Element> {
        self.matching(control)
            .await?
            .into_iter()
            .nth(nth)
            .ok_or_else(|| CoreError::Portal(format!("no control #{nth} matching {control}")).into())
    }

    async fn cookie_header(&self) -> anyhow::Result<String> {
        let cookies = self.client.get_all_cookies().await?;
        Ok(cookies
            .iter()
            .map(|cookie| format!("{}={}", cookie.name(), cookie.value()))
            .collect::<Vec<_>>()
            .join("; "))
    }
}

#[async_trait]
impl Portal for WebDriverPortal {
    async fn goto(&self, url: &str) -> anyhow::Result<()> {
        self.client.goto(url).await?;
        Ok(())
    }

    async fn count(&self, control: &ControlDescriptor) -> anyhow::Result<usize> {
        Ok(self.matching(control).await?.len())
    }

    async fn click(&self, control: &ControlDescriptor, nth: usize) -> anyhow::Result<()> {
        self.nth(control, nth).await?.click().await?;
        Ok(())
    }

    async fn fill(&self, control: &ControlDescriptor, value: &str) -> anyhow::Result<()> {
        let element = self.nth(control, 0).await?;
        element.clear().await?;
        element.send_keys(value).await?;
        Ok(())
    }

    async fn type_slowly(
        &self,
        control: &ControlDescriptor,
        value: &str,
        per_key: Duration,
    ) -> anyhow::Result<()> {
        let element = self.nth(control, 0).await?;
        element.click().await?;
        for ch in value.chars() {
            element.send_keys(&ch.to_string()).await?;
            tokio::time::sleep(per_key).await;
        }
        Ok(())
    }

    async fn press_enter(&self, control: &ControlDescriptor) -> anyhow::Result<()> {
        let element = self.nth(control, 0).await?;
        element.send_keys(&char::from(Key::Enter).to_string()).await?;
        Ok(())
    }

    async fn select_by_label(
        &self,
        control: &ControlDescriptor,
        label: &str,
    ) -> anyhow::Result<()> {
        self.nth(control, 0).await?.select_by_label(label).await?;
        Ok(())
    }

    async fn text(&self, control: &ControlDescriptor) -> anyhow::Result<Option<String>> {
        match self.matching(control).await?.into_iter().next() {
            Some(element) => Ok(Some(element.text().await?)),
            None => Ok(None),
        }
    }

    async fn download(&self, control: &ControlDescriptor) -> anyhow::Result<Vec<u8>> {
        let element = self.nth(control, 0).await?;
        let href = element
            .attr("href")
            .await?
            .ok_or_else(|| CoreError::Portal(format!("{control} has no href")))?;

        let base = self.client.current_url().await?;
        let target = base
            .join(&href)
            .with_context(|| format!("invalid download link {href}"))?;

        let response = self
            .http
            .get(target.clone())
            .header(COOKIE, self.cookie_header().await?)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::Portal(format!(
                "download of {target} failed with status {}",
                status.as_u16()
            ))
            .into());
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(CoreError::Portal(format!("download of {target} was empty")).into());
        }
        Ok(bytes.to_vec())
    }

    async fn go_back(&self) -> anyhow::Result<()> {
        self.client.back().await?;
        Ok(())
    }

    async fn screenshot(&self) -> anyhow::Result<Vec<u8>> {
        Ok(self.client.screenshot().await?)
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.client.clone().close().await?;
        Ok(())
    }
}
