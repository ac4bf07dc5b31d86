use std::time::Duration;

use super::errors::CoreError;
use super::models::{
    DoneReason, PortalCredentials, PortalLayout, ResultPage, RuntimeSettings, SearchQuery,
};
use super::observer::{RunEvent, RunObserver};
use super::portal::{ControlDescriptor, Portal};
use super::wait::wait_for_control;

#[derive(Debug, Clone)]
pub struct NavigatorConfig {
    pub base_url: String,
    pub layout: PortalLayout,
    pub max_pages: u32,
    pub step_timeout: Duration,
    pub poll_interval: Duration,
    pub typing_delay: Duration,
}

impl NavigatorConfig {
    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        Self {
            base_url: settings.portal_url.clone(),
            layout: settings.layout.clone(),
            max_pages: settings.max_pages.max(1),
            step_timeout: settings.step_timeout(),
            poll_interval: settings.poll_interval(),
            typing_delay: Duration::from_millis(settings.typing_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationState {
    Searching,
    PageReady(ResultPage),
    Done(DoneReason),
}

#[derive(Debug, Clone)]
pub struct HarvestSession {
    authenticated: bool,
    query: Option<SearchQuery>,
    state: PaginationState,
    pages_visited: u32,
}

impl HarvestSession {
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn query(&self) -> Option<&SearchQuery> {
        self.query.as_ref()
    }

    pub fn state(&self) -> PaginationState {
        self.state
    }

    pub fn pages_visited(&self) -> u32 {
        self.pages_visited
    }

    pub fn done_reason(&self) -> Option<DoneReason> {
        match self.state {
            PaginationState::Done(reason) => Some(reason),
            _ => None,
        }
    }
}

pub struct SessionNavigator<'a, P: Portal + ?Sized> {
    portal: &'a P,
    config: &'a NavigatorConfig,
    observer: &'a dyn RunObserver,
}

impl<'a, P: Portal + ?Sized> SessionNavigator<'a, P> {
    pub fn new(portal: &'a P, config: &'a NavigatorConfig, observer: &'a dyn RunObserver) -> Self {
        Self {
            portal,
            config,
            observer,
        }
    }

    pub async fn authenticate(
        &self,
        credentials: &PortalCredentials,
    ) -> anyhow::Result<HarvestSession> {
        if credentials.email.trim().is_empty() || credentials.password.is_empty() {
            return Err(CoreError::MissingPrerequisite(
                "portal email and password must be configured".to_string(),
            )
            .into());
        }

        let layout = &self.config.layout;
        self.portal
            .goto(&self.config.base_url)
            .await
            .map_err(|err| CoreError::Authentication(format!("portal unreachable: {err}")))?;

        if !self.present(&layout.login_email).await {
            return Err(CoreError::Authentication("login form not found".to_string()).into());
        }

        let submitted = async {
            self.portal.fill(&layout.login_email, &credentials.email).await?;
            self.portal
                .fill(&layout.login_password, &credentials.password)
                .await?;
            self.portal.click(&layout.login_submit, 0).await
        }
        .await;
        if let Err(err) = submitted {
            return Err(CoreError::Authentication(format!("could not submit login: {err}")).into());
        }

        if !self.present(&layout.landmark).await {
            return Err(CoreError::Authentication(format!(
                "recruiter area did not appear within {:?}",
                self.config.step_timeout
            ))
            .into());
        }

        self.observer.on_event(&RunEvent::LoggedIn);
        Ok(HarvestSession {
            authenticated: true,
            query: None,
            state: PaginationState::Searching,
            pages_visited: 0,
        })
    }

    pub async fn run_search(
        &self,
        session: &mut HarvestSession,
        query: &SearchQuery,
    ) -> anyhow::Result<ResultPage> {
        if !session.authenticated {
            return Err(CoreError::navigation("search", "session is not authenticated").into());
        }

        let layout = &self.config.layout;
        let typing = self.config.typing_delay;

        self.click_step("open recruiter area", &layout.landmark).await?;
        self.click_step("open candidate database", &layout.candidate_database)
            .await?;
        self.click_step("consult candidate database", &layout.consult_database)
            .await?;

        self.require("job title", &layout.job_title_input).await?;
        self.act("job title", async {
            self.portal
                .type_slowly(&layout.job_title_input, &query.job_title, typing)
                .await?;
            self.portal.press_enter(&layout.job_title_input).await
        })
        .await?;

        self.require("region", &layout.region_input).await?;
        self.act(
            "region",
            self.portal
                .type_slowly(&layout.region_input, &query.region, typing),
        )
        .await?;
        self.click_step("region suggestion", &layout.region_suggestion)
            .await?;

        self.require("recency filter", &layout.recency_select).await?;
        self.act(
            "recency filter",
            self.portal
                .select_by_label(&layout.recency_select, query.recency.label()),
        )
        .await?;

        self.click_step("submit search", &layout.search_submit).await?;
        self.observer.on_event(&RunEvent::SearchSubmitted {
            query: query.clone(),
        });

        session.query = Some(query.clone());
        let page = self.observe_page(1).await?;
        self.enter_page(session, page);
        Ok(page)
    }

    pub async fn next_page(
        &self,
        session: &mut HarvestSession,
        current: &ResultPage,
    ) -> anyhow::Result<Option<ResultPage>> {
        if let Some(reason) = self.stop_reason(current).await? {
            session.state = PaginationState::Done(reason);
            self.observer.on_event(&RunEvent::PaginationFinished {
                pages: session.pages_visited,
                reason,
            });
            return Ok(None);
        }

        let layout = &self.config.layout;
        self.act("next page", self.portal.click(&layout.next_page, 0))
            .await?;

        let page = self.observe_page(current.number + 1).await?;
        self.enter_page(session, page);
        Ok(Some(page))
    }

    async fn stop_reason(&self, current: &ResultPage) -> anyhow::Result<Option<DoneReason>> {
        if current.item_count == 0 {
            return Ok(Some(DoneReason::NoItems));
        }
        if current.number >= self.config.max_pages {
            return Ok(Some(DoneReason::PageLimit));
        }

        let next_controls = self
            .portal
            .count(&self.config.layout.next_page)
            .await
            .map_err(|err| CoreError::navigation("next page", err.to_string()))?;
        if next_controls == 0 {
            return Ok(Some(DoneReason::NoNextPage));
        }

        Ok(None)
    }

    fn enter_page(&self, session: &mut HarvestSession, page: ResultPage) {
        session.pages_visited = page.number;
        session.state = PaginationState::PageReady(page);
        self.observer.on_event(&RunEvent::PageStarted {
            page: page.number,
            items: page.item_count,
        });
    }

    async fn observe_page(&self, number: u32) -> anyhow::Result<ResultPage> {
        let view_document = &self.config.layout.view_document;
        self.present(view_document).await;

        let item_count = self
            .portal
            .count(view_document)
            .await
            .map_err(|err| CoreError::navigation("read result listing", err.to_string()))?;

        Ok(ResultPage { number, item_count })
    }

    async fn present(&self, control: &ControlDescriptor) -> bool {
        wait_for_control(
            self.portal,
            control,
            1,
            self.config.step_timeout,
            self.config.poll_interval,
        )
        .await
    }

    async fn require(&self, step: &str, control: &ControlDescriptor) -> anyhow::Result<()> {
        if self.present(control).await {
            return Ok(());
        }

        Err(CoreError::navigation(
            step,
            format!(
                "{control} did not appear within {:?}",
                self.config.step_timeout
            ),
        )
        .into())
    }

    async fn act<F>(&self, step: &str, action: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = anyhow::Result<()>>,
    {
        action
            .await
            .map_err(|err| CoreError::navigation(step, err.to_string()).into())
    }

    async fn click_step(&self, step: &str, control: &ControlDescriptor) -> anyhow::Result<()> {
        self.require(step, control).await?;
        self.act(step, self.portal.click(control, 0)).await
    }
}
