//! Single-threaded event dispatcher.
//!
//! Every host callback and every backend result arrives as a [`TrackerEvent`] on one
//! channel and is handled to completion before the next. Backend calls block, so they run
//! on a fixed [`WorkerPool`] that posts each result back onto the same channel.

use crate::config::TrackerConfig;
use crate::events::RiddleBundle;
use crate::events::TrackerEvent;
use crate::session::Session;
use crate::session::SnapshotReader;
use crate::workers::SubmitError;
use crate::workers::WorkerPool;
use rd_auth::AuthChallenge;
use rd_auth::AuthInterceptor;
use rd_auth::AuthResponder;
use rd_auth::MissingCredentialsHint;
use rd_auth::PromptHost;
use rd_auth::TabHost;
use rd_backend::ProcessOutcome;
use rd_backend::ProcessedPage;
use rd_backend::RiddleBackend;
use rd_backend::SessionExpiry;
use rd_backend::UnlockedCredentials;
use rd_backend::VisitedResponse;
use rd_core::TabId;
use rd_core::TrackerResult;
use rd_net::VisitedUrl;
use rd_net::strip_www_prefix;
use rd_riddle::PagesData;
use rd_riddle::RiddleData;
use rd_riddle::RiddleSnapshot;
use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Instant;

const GUILD_INVITE_BASE: &str = "https://discord.gg/";
const STATUS_UNAUTHORIZED: u16 = 401;

pub struct Dispatcher<B, H> {
    workers: WorkerPool<B>,
    host: H,
    session: Session,
    auth: AuthInterceptor,
    server_host: String,
    login_url: String,
    sender: mpsc::Sender<TrackerEvent>,
    events: mpsc::Receiver<TrackerEvent>,
    pending_workers: usize,
}

impl<B, H> Dispatcher<B, H>
where
    B: RiddleBackend + 'static,
    H: TabHost + PromptHost + AuthResponder,
{
    pub fn new(config: &TrackerConfig, backend: Arc<B>, host: H) -> TrackerResult<Self> {
        config.validate()?;
        let server = config.server_endpoint()?;
        let (sender, events) = mpsc::channel();
        let workers = WorkerPool::start(
            config.backend_workers,
            config.backend_queue,
            backend,
            sender.clone(),
        )?;

        Ok(Self {
            workers,
            host,
            session: Session::new(config.sensitive_paths.clone(), config.login_debounce),
            auth: AuthInterceptor::new(config.auth_debounce),
            server_host: strip_www_prefix(server.host()).to_owned(),
            login_url: config.login_url()?,
            sender,
            events,
            pending_workers: 0,
        })
    }

    /// Channel for host callbacks.
    pub fn sender(&self) -> mpsc::Sender<TrackerEvent> {
        self.sender.clone()
    }

    pub fn reader(&self) -> SnapshotReader {
        self.session.reader()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn auth(&self) -> &AuthInterceptor {
        &self.auth
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Fetches every riddle and its pages in the background.
    pub fn bootstrap(&mut self) {
        let generation = self.session.generation();
        self.submit_backend(move |backend| TrackerEvent::Bootstrapped {
            generation,
            result: fetch_bundle(backend),
        });
    }

    pub fn run(mut self) {
        while let Ok(event) = self.events.recv() {
            if self.handle(event).is_break() {
                break;
            }
        }
        tracing::info!("dispatcher stopped");
    }

    /// Handles events until the queue is empty and no worker is outstanding.
    pub fn run_until_idle(&mut self) -> ControlFlow<()> {
        loop {
            let next = if self.pending_workers > 0 {
                self.events.recv().ok()
            } else {
                self.events.try_recv().ok()
            };
            let Some(event) = next else {
                return ControlFlow::Continue(());
            };
            if self.handle(event).is_break() {
                return ControlFlow::Break(());
            }
        }
    }

    pub fn handle(&mut self, event: TrackerEvent) -> ControlFlow<()> {
        if event.is_worker_result() {
            self.pending_workers = self.pending_workers.saturating_sub(1);
        }

        match event {
            TrackerEvent::ResponseCompleted { tab, response } => {
                self.on_response_completed(tab, response);
            }
            TrackerEvent::AuthRequired(challenge) => self.on_auth_required(&challenge),
            TrackerEvent::TabLoading { tab, url, active } => self.on_tab_loading(tab, &url, active),
            TrackerEvent::TabRemoved { tab } => self.auth.forget_tab(tab),
            TrackerEvent::PromptReply { channel, reply } => {
                self.auth.on_prompt_reply(channel, reply, &self.host);
            }
            TrackerEvent::Bootstrapped { generation, result } => {
                if self.session.is_current(generation) {
                    self.on_bootstrapped(result);
                }
            }
            TrackerEvent::Processed {
                generation,
                tab,
                response,
                outcome,
            } => {
                if self.session.is_current(generation) {
                    self.on_processed(tab, &response, outcome);
                } else {
                    tracing::debug!(url = %response.url, "processing result from an expired session dropped");
                }
            }
            TrackerEvent::RiddleFetched {
                generation,
                alias,
                result,
                unlocked,
            } => {
                if self.session.is_current(generation) {
                    self.on_riddle_fetched(&alias, result, unlocked.as_ref());
                }
            }
            TrackerEvent::LevelPagesFetched {
                generation,
                alias,
                set_name,
                level_name,
                result,
                unlocked,
            } => {
                if self.session.is_current(generation) {
                    self.on_level_pages_fetched(&alias, &set_name, &level_name, result, unlocked.as_ref());
                }
            }
            TrackerEvent::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    fn submit_backend<F>(&mut self, job: F)
    where
        F: FnOnce(&B) -> TrackerEvent + Send + 'static,
    {
        match self.workers.submit(job) {
            Ok(()) => self.pending_workers += 1,
            Err(SubmitError::QueueFull) => {
                tracing::warn!(workers = self.workers.size(), "backend queue full, call dropped");
            }
            Err(SubmitError::Stopped) => tracing::warn!("backend workers stopped, call dropped"),
        }
    }

    fn on_response_completed(&mut self, tab: TabId, response: VisitedResponse) {
        let Ok(url) = VisitedUrl::parse(&response.url) else {
            tracing::trace!(url = %response.url, "response url not trackable");
            return;
        };
        if url.normalized_host() == self.server_host {
            return;
        }

        let generation = self.session.generation();
        self.submit_backend(move |backend| {
            let outcome = backend.process(&response);
            TrackerEvent::Processed {
                generation,
                tab,
                response,
                outcome,
            }
        });
    }

    fn on_processed(
        &mut self,
        tab: TabId,
        response: &VisitedResponse,
        outcome: TrackerResult<ProcessOutcome>,
    ) {
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!(url = %response.url, %error, "visited url dropped");
                return;
            }
        };

        match outcome {
            ProcessOutcome::Processed(page) => self.on_page_processed(tab, response, page),
            ProcessOutcome::SessionExpired(expiry) => self.on_session_expired(expiry),
            ProcessOutcome::MissingCredentials {
                riddle,
                realm,
                credentials_path,
            } => {
                // A 401 already went through the native challenge path.
                if response.status_code == STATUS_UNAUTHORIZED {
                    return;
                }
                let snapshot = self.session.snapshot();
                let riddle = riddle.or_else(|| {
                    snapshot
                        .resolve_str(&response.url)
                        .map(|resolved| resolved.riddle)
                });
                let Some(riddle) = riddle else {
                    tracing::debug!(url = %response.url, "missing credentials outside known riddles");
                    return;
                };

                let hint = MissingCredentialsHint {
                    riddle,
                    realm,
                    credentials_path,
                    tab,
                    url: response.url.clone(),
                };
                let handled =
                    self.auth
                        .on_missing_credentials(&hint, &snapshot, &self.host, Instant::now());
                tracing::debug!(riddle = %hint.riddle, path = %hint.credentials_path, outcome = ?handled, "missing credentials hint");
            }
            ProcessOutcome::NotLevelPage { riddle } => self.session.set_current_riddle(&riddle),
            ProcessOutcome::OutsideRiddles => {}
            ProcessOutcome::Locked { riddle }
            | ProcessOutcome::ShortRun { riddle }
            | ProcessOutcome::NotFound { riddle }
            | ProcessOutcome::Discarded { riddle } => {
                if let Some(riddle) = &riddle {
                    self.session.set_current_riddle(riddle);
                }
                tracing::debug!(url = %response.url, riddle = ?riddle, "page not recorded");
            }
        }
    }

    fn on_page_processed(&mut self, tab: TabId, response: &VisitedResponse, page: ProcessedPage) {
        tracing::debug!(
            riddle = %page.riddle,
            path = %page.path,
            first_visit = page.first_visit,
            "page processed"
        );
        self.session.set_current_riddle(&page.riddle);
        self.auth.on_unlocked_response(
            &page.riddle,
            &page.path,
            response.status_code,
            tab,
            &response.url,
            &self.host,
        );

        let ProcessedPage {
            riddle: alias,
            set_name,
            level_name,
            unlocked_credentials: unlocked,
            ..
        } = page;
        let (Some(set_name), Some(level_name)) = (set_name, level_name) else {
            if unlocked.is_some() {
                let snapshot = RiddleSnapshot::clone(&self.session.snapshot());
                self.session.publish(with_unlocked(snapshot, &alias, unlocked.as_ref()));
            }
            return;
        };

        let generation = self.session.generation();
        if self.session.snapshot().knows_level(&alias, &set_name, &level_name) {
            self.submit_backend(move |backend| {
                let result = backend.fetch_pages(&alias, Some(&level_name));
                TrackerEvent::LevelPagesFetched {
                    generation,
                    alias,
                    set_name,
                    level_name,
                    result,
                    unlocked,
                }
            });
        } else {
            tracing::info!(riddle = %alias, level = %level_name, "new riddle or level; rebuilding");
            self.submit_backend(move |backend| {
                let result = fetch_riddle_with_pages(backend, &alias);
                TrackerEvent::RiddleFetched {
                    generation,
                    alias,
                    result,
                    unlocked,
                }
            });
        }
    }

    fn on_session_expired(&mut self, expiry: SessionExpiry) {
        self.session.expire();
        self.auth.reset();
        if !self.session.should_prompt_login(Instant::now()) {
            return;
        }

        let url = match expiry {
            SessionExpiry::NotLoggedIn => self.login_url.clone(),
            SessionExpiry::NotGuildMember { invite } => format!("{GUILD_INVITE_BASE}{invite}"),
        };
        match self.host.create_tab(&url, true) {
            Ok(tab) => tracing::info!(tab = %tab, %url, "opened login tab"),
            Err(error) => tracing::debug!(%error, "login tab not opened"),
        }
    }

    fn on_bootstrapped(&mut self, result: TrackerResult<RiddleBundle>) {
        let built = result.and_then(|bundle| {
            RiddleSnapshot::build(&bundle.riddles, &bundle.pages, self.session.sensitive_paths())
        });
        match built {
            Ok(snapshot) => {
                tracing::info!(riddles = snapshot.registry().entries().len(), "riddle state loaded");
                self.session.publish(snapshot);
            }
            Err(error) => tracing::warn!(%error, "riddle bootstrap failed"),
        }
    }

    fn on_riddle_fetched(
        &mut self,
        alias: &str,
        result: TrackerResult<(RiddleData, PagesData)>,
        unlocked: Option<&UnlockedCredentials>,
    ) {
        let rebuilt = result.and_then(|(data, pages)| {
            self.session
                .snapshot()
                .with_riddle(&data, &pages, self.session.sensitive_paths())
        });
        match rebuilt {
            Ok(snapshot) => {
                self.session.publish(with_unlocked(snapshot, alias, unlocked));
                tracing::debug!(riddle = alias, "riddle rebuilt");
            }
            Err(error) => tracing::warn!(riddle = alias, %error, "riddle rebuild failed"),
        }
    }

    fn on_level_pages_fetched(
        &mut self,
        alias: &str,
        set_name: &str,
        level_name: &str,
        result: TrackerResult<PagesData>,
        unlocked: Option<&UnlockedCredentials>,
    ) {
        let merged = result.and_then(|pages| {
            self.session
                .snapshot()
                .with_level_pages(alias, set_name, level_name, &pages)
        });
        match merged {
            Ok(snapshot) => {
                self.session.publish(with_unlocked(snapshot, alias, unlocked));
                tracing::debug!(riddle = alias, level = level_name, "level pages merged");
            }
            Err(error) => tracing::warn!(riddle = alias, level = level_name, %error, "level merge failed"),
        }
    }

    fn on_auth_required(&mut self, challenge: &AuthChallenge) {
        let snapshot = self.session.snapshot();
        let decision = self.auth.on_auth_required(challenge, &snapshot, Instant::now());
        if let Err(error) = self.host.answer_auth(&challenge.request_id, &decision.response) {
            tracing::warn!(request = %challenge.request_id, %error, "auth decision not delivered");
        }
        if let Some(followup) = decision.followup {
            self.auth.run_followup(followup, &self.host);
        }
    }

    fn on_tab_loading(&mut self, tab: TabId, url: &str, active: bool) {
        let Ok(visited) = VisitedUrl::parse(url) else {
            return;
        };
        let Some(next) = self.session.snapshot().registry().blacklist_redirect(&visited) else {
            return;
        };

        tracing::info!(tab = %tab, %url, %next, "replacing blacklisted page");
        let replaced = self
            .host
            .remove_tab(tab)
            .and_then(|()| self.host.create_tab(&next, active));
        if let Err(error) = replaced {
            tracing::debug!(tab = %tab, %error, "blacklist replacement aborted");
        }
    }
}

fn with_unlocked(
    snapshot: RiddleSnapshot,
    alias: &str,
    unlocked: Option<&UnlockedCredentials>,
) -> RiddleSnapshot {
    let Some(unlocked) = unlocked else {
        return snapshot;
    };
    match snapshot.with_credentials(alias, &unlocked.path, &unlocked.credentials()) {
        Some(updated) => updated,
        None => {
            tracing::debug!(riddle = alias, path = %unlocked.path, "unlocked path not in page tree");
            snapshot
        }
    }
}

fn fetch_bundle<B: RiddleBackend + ?Sized>(backend: &B) -> TrackerResult<RiddleBundle> {
    let riddles = backend.fetch_all_riddles()?;
    let mut pages = BTreeMap::new();
    for alias in riddles.keys() {
        pages.insert(alias.clone(), backend.fetch_pages(alias, None)?);
    }
    Ok(RiddleBundle { riddles, pages })
}

fn fetch_riddle_with_pages<B: RiddleBackend + ?Sized>(
    backend: &B,
    alias: &str,
) -> TrackerResult<(RiddleData, PagesData)> {
    let riddle = backend.fetch_riddle(alias)?;
    let pages = backend.fetch_pages(alias, None)?;
    Ok((riddle, pages))
}

#[cfg(test)]
mod tests {
    use super::Dispatcher;
    use crate::config::TrackerConfig;
    use crate::events::TrackerEvent;
    use rd_auth::AuthChallenge;
    use rd_auth::AuthResponder;
    use rd_auth::AuthResponse;
    use rd_auth::PromptHost;
    use rd_auth::PromptMessage;
    use rd_auth::TabHost;
    use rd_auth::TabInfo;
    use rd_backend::ProcessOutcome;
    use rd_backend::ProcessedPage;
    use rd_backend::RiddleBackend;
    use rd_backend::SessionExpiry;
    use rd_backend::UnlockedCredentials;
    use rd_backend::VisitedResponse;
    use rd_core::Credentials;
    use rd_core::PromptChannelId;
    use rd_core::RequestId;
    use rd_core::TabId;
    use rd_core::TrackerError;
    use rd_core::TrackerResult;
    use rd_riddle::PagesData;
    use rd_riddle::RiddleData;
    use rd_riddle::data::parse_pages;
    use rd_riddle::data::parse_riddle;
    use rd_riddle::data::parse_riddles;
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::collections::HashMap;
    use std::ops::ControlFlow;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::PoisonError;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    const RIDDLE: &str = r#"{"alias": "rns", "rootPath": "https://example.com/riddle/*",
        "orderedLevels": [{"name": "1", "setName": "Act I"}, {"name": "2", "setName": "Act I"}],
        "blacklistedPages": [{"path": "/trap.htm", "nextPath": "/safe.htm"}]}"#;
    const PAGES: &str = r#"{"1": {"/": {"path": "/", "folder": true, "children": {
        "secret": {"path": "/secret", "folder": true, "children": {
            "x.htm": {"path": "/secret/x.htm", "folder": false}
        }}
    }}}}"#;
    const SECRET_PAGE: &str = "https://example.com/riddle/secret/x.htm";

    #[derive(Default)]
    struct FakeBackend {
        outcomes: Mutex<HashMap<String, ProcessOutcome>>,
        calls: Mutex<Vec<String>>,
        delay: Duration,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FakeBackend {
        fn answering(url: &str, outcome: ProcessOutcome) -> Self {
            let backend = Self::default();
            backend
                .outcomes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(url.to_owned(), outcome);
            backend
        }

        fn record(&self, call: String) {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    impl RiddleBackend for FakeBackend {
        fn process(&self, visited: &VisitedResponse) -> TrackerResult<ProcessOutcome> {
            self.record(format!("process {}", visited.url));
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.outcomes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&visited.url)
                .cloned()
                .ok_or_else(|| TrackerError::new("net.transport.connect_failed", "offline"))
        }

        fn fetch_all_riddles(&self) -> TrackerResult<BTreeMap<String, RiddleData>> {
            self.record("all riddles".to_owned());
            parse_riddles(&format!(r#"{{"rns": {RIDDLE}}}"#))
        }

        fn fetch_riddle(&self, alias: &str) -> TrackerResult<RiddleData> {
            self.record(format!("riddle {alias}"));
            parse_riddle(RIDDLE)
        }

        fn fetch_pages(&self, alias: &str, level: Option<&str>) -> TrackerResult<PagesData> {
            self.record(format!("pages {alias} {}", level.unwrap_or("*")));
            parse_pages(PAGES)
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum HostCall {
        Answer(RequestId, AuthResponse),
        Create(String, bool),
        Remove(TabId),
        Navigate(TabId, String),
        Prompt(PromptChannelId, TabId, PromptMessage),
    }

    #[derive(Default)]
    struct FakeHost {
        tabs: RefCell<BTreeMap<TabId, String>>,
        calls: RefCell<Vec<HostCall>>,
    }

    impl FakeHost {
        fn with_tab(tab: TabId, url: &str) -> Self {
            let host = Self::default();
            host.tabs.borrow_mut().insert(tab, url.to_owned());
            host
        }

        fn calls(&self) -> Vec<HostCall> {
            self.calls.borrow().clone()
        }

        fn count(&self, wanted: fn(&HostCall) -> bool) -> usize {
            self.calls.borrow().iter().filter(|call| wanted(call)).count()
        }
    }

    impl TabHost for FakeHost {
        fn get_tab(&self, tab: TabId) -> TrackerResult<TabInfo> {
            let url = self.tabs.borrow().get(&tab).cloned();
            let url = url.ok_or_else(|| TrackerError::new("tabs.gone", "closed"))?;
            Ok(TabInfo {
                id: tab,
                url,
                active: true,
            })
        }

        fn duplicate_tab(&self, _tab: TabId) -> TrackerResult<TabId> {
            Err(TrackerError::new("tabs.unsupported", "no duplicates here"))
        }

        fn remove_tab(&self, tab: TabId) -> TrackerResult<()> {
            self.calls.borrow_mut().push(HostCall::Remove(tab));
            self.tabs.borrow_mut().remove(&tab);
            Ok(())
        }

        fn navigate_tab(&self, tab: TabId, url: &str) -> TrackerResult<()> {
            self.calls
                .borrow_mut()
                .push(HostCall::Navigate(tab, url.to_owned()));
            Ok(())
        }

        fn create_tab(&self, url: &str, active: bool) -> TrackerResult<TabId> {
            self.calls
                .borrow_mut()
                .push(HostCall::Create(url.to_owned(), active));
            Ok(TabId(77))
        }
    }

    impl PromptHost for FakeHost {
        fn open_prompt(
            &self,
            channel: PromptChannelId,
            tab: TabId,
            message: &PromptMessage,
        ) -> TrackerResult<()> {
            self.calls
                .borrow_mut()
                .push(HostCall::Prompt(channel, tab, message.clone()));
            Ok(())
        }
    }

    impl AuthResponder for FakeHost {
        fn answer_auth(&self, request: &RequestId, response: &AuthResponse) -> TrackerResult<()> {
            self.calls
                .borrow_mut()
                .push(HostCall::Answer(request.clone(), response.clone()));
            Ok(())
        }
    }

    fn new_dispatcher(
        backend: FakeBackend,
        host: FakeHost,
    ) -> (Dispatcher<FakeBackend, FakeHost>, Arc<FakeBackend>) {
        new_dispatcher_with(&TrackerConfig::default(), backend, host)
    }

    fn new_dispatcher_with(
        config: &TrackerConfig,
        backend: FakeBackend,
        host: FakeHost,
    ) -> (Dispatcher<FakeBackend, FakeHost>, Arc<FakeBackend>) {
        let backend = Arc::new(backend);
        let dispatcher = Dispatcher::new(config, Arc::clone(&backend), host);
        (dispatcher.unwrap_or_else(|error| panic!("{error}")), backend)
    }

    fn bootstrapped(
        backend: FakeBackend,
        host: FakeHost,
    ) -> (Dispatcher<FakeBackend, FakeHost>, Arc<FakeBackend>) {
        let (mut dispatcher, backend) = new_dispatcher(backend, host);
        dispatcher.bootstrap();
        assert!(dispatcher.run_until_idle().is_continue());
        (dispatcher, backend)
    }

    fn visit(dispatcher: &mut Dispatcher<FakeBackend, FakeHost>, tab: i64, url: &str, status: u16) {
        let event = TrackerEvent::ResponseCompleted {
            tab: TabId(tab),
            response: VisitedResponse::new(url, status),
        };
        assert!(dispatcher.handle(event).is_continue());
        assert!(dispatcher.run_until_idle().is_continue());
    }

    fn processed(level: Option<&str>, unlocked: Option<UnlockedCredentials>) -> ProcessOutcome {
        ProcessOutcome::Processed(ProcessedPage {
            riddle: "rns".to_owned(),
            set_name: level.map(|_| "Act I".to_owned()),
            level_name: level.map(str::to_owned),
            path: "/secret/x.htm".to_owned(),
            unlocked_credentials: unlocked,
            first_visit: false,
        })
    }

    #[test]
    fn bootstrap_publishes_snapshot_for_readers() {
        let (dispatcher, backend) = bootstrapped(FakeBackend::default(), FakeHost::default());
        let resolved = dispatcher.reader().resolve(SECRET_PAGE);
        assert!(resolved.is_some_and(|resolved| resolved.path == "/secret/x.htm"));
        assert_eq!(backend.calls(), vec!["all riddles".to_owned(), "pages rns *".to_owned()]);
    }

    #[test]
    fn unknown_level_rebuilds_riddle_and_stores_credentials() {
        let unlocked = UnlockedCredentials {
            path: "/secret".to_owned(),
            username: "u".to_owned(),
            password: "p".to_owned(),
        };
        let (mut dispatcher, backend) = new_dispatcher(
            FakeBackend::answering(SECRET_PAGE, processed(Some("1"), Some(unlocked))),
            FakeHost::default(),
        );

        visit(&mut dispatcher, 1, SECRET_PAGE, 200);
        assert_eq!(
            backend.calls(),
            vec![
                format!("process {SECRET_PAGE}"),
                "riddle rns".to_owned(),
                "pages rns *".to_owned(),
            ]
        );
        let snapshot = dispatcher.session().snapshot();
        assert_eq!(
            snapshot.unlocked_credentials("rns", "/secret/x.htm"),
            Some(&Credentials::new("u", "p"))
        );
        assert_eq!(dispatcher.session().current_riddle(), Some("rns"));
    }

    #[test]
    fn known_level_merges_only_its_pages() {
        let (mut dispatcher, backend) = bootstrapped(
            FakeBackend::answering(SECRET_PAGE, processed(Some("1"), None)),
            FakeHost::default(),
        );

        visit(&mut dispatcher, 1, SECRET_PAGE, 200);
        assert_eq!(backend.calls().last().map(String::as_str), Some("pages rns 1"));
        let snapshot = dispatcher.session().snapshot();
        let progress = snapshot.progress("rns").unwrap_or_else(|| unreachable!());
        assert_eq!(progress.last_visited_level.as_deref(), Some("1"));
    }

    #[test]
    fn session_expiry_clears_state_and_opens_one_login_tab() {
        let (mut dispatcher, _backend) = bootstrapped(
            FakeBackend::answering(
                SECRET_PAGE,
                ProcessOutcome::SessionExpired(SessionExpiry::NotLoggedIn),
            ),
            FakeHost::default(),
        );
        visit(&mut dispatcher, 1, SECRET_PAGE, 200);
        visit(&mut dispatcher, 1, SECRET_PAGE, 200);

        assert!(dispatcher.session().snapshot().is_empty());
        assert!(dispatcher.reader().resolve(SECRET_PAGE).is_none());
        assert_eq!(
            dispatcher.host().calls(),
            vec![HostCall::Create("https://riddler.app/login".to_owned(), true)]
        );
    }

    #[test]
    fn guild_invite_opens_discord() {
        let (mut dispatcher, _backend) = new_dispatcher(
            FakeBackend::answering(
                SECRET_PAGE,
                ProcessOutcome::SessionExpired(SessionExpiry::NotGuildMember {
                    invite: "abcXYZ".to_owned(),
                }),
            ),
            FakeHost::default(),
        );
        visit(&mut dispatcher, 1, SECRET_PAGE, 200);
        assert_eq!(
            dispatcher.host().calls(),
            vec![HostCall::Create("https://discord.gg/abcXYZ".to_owned(), true)]
        );
    }

    #[test]
    fn results_from_expired_generation_are_dropped() {
        let (mut dispatcher, _backend) = new_dispatcher(FakeBackend::default(), FakeHost::default());
        let stale = TrackerEvent::RiddleFetched {
            generation: dispatcher.session().generation() + 1,
            alias: "rns".to_owned(),
            result: parse_riddle(RIDDLE)
                .and_then(|riddle| parse_pages(PAGES).map(|pages| (riddle, pages))),
            unlocked: None,
        };
        assert!(dispatcher.handle(stale).is_continue());
        assert!(dispatcher.session().snapshot().is_empty());
    }

    #[test]
    fn auth_challenge_is_answered_before_prompt_opens() {
        let (mut dispatcher, _backend) = bootstrapped(FakeBackend::default(), FakeHost::default());
        let challenge = AuthChallenge {
            request_id: RequestId::new("31"),
            tab_id: TabId(4),
            url: SECRET_PAGE.to_owned(),
            realm: Some("Members".to_owned()),
        };
        assert!(dispatcher.handle(TrackerEvent::AuthRequired(challenge.clone())).is_continue());
        assert!(dispatcher.handle(TrackerEvent::AuthRequired(challenge)).is_continue());

        let calls = dispatcher.host().calls();
        assert_eq!(calls[0], HostCall::Answer(RequestId::new("31"), AuthResponse::Cancel));
        assert!(matches!(calls[1], HostCall::Prompt(_, TabId(4), _)));
        assert_eq!(dispatcher.host().count(|call| matches!(call, HostCall::Prompt(..))), 1);
        assert_eq!(dispatcher.host().count(|call| matches!(call, HostCall::Answer(..))), 2);
    }

    #[test]
    fn removed_tab_closes_its_prompt_channel() {
        let (mut dispatcher, _backend) = bootstrapped(FakeBackend::default(), FakeHost::default());
        let challenge = AuthChallenge {
            request_id: RequestId::new("32"),
            tab_id: TabId(4),
            url: SECRET_PAGE.to_owned(),
            realm: None,
        };
        assert!(dispatcher.handle(TrackerEvent::AuthRequired(challenge)).is_continue());
        assert_eq!(dispatcher.auth().prompts().len(), 1);

        assert!(dispatcher.handle(TrackerEvent::TabRemoved { tab: TabId(4) }).is_continue());
        assert!(dispatcher.auth().prompts().is_empty());
    }

    #[test]
    fn missing_credentials_hint_prompts_once() {
        let outcome = ProcessOutcome::MissingCredentials {
            riddle: Some("rns".to_owned()),
            realm: "Members".to_owned(),
            credentials_path: "/secret".to_owned(),
        };
        let (mut dispatcher, _backend) = bootstrapped(
            FakeBackend::answering(SECRET_PAGE, outcome),
            FakeHost::with_tab(TabId(2), SECRET_PAGE),
        );

        visit(&mut dispatcher, 2, SECRET_PAGE, 200);
        visit(&mut dispatcher, 2, SECRET_PAGE, 200);
        assert_eq!(dispatcher.host().count(|call| matches!(call, HostCall::Prompt(..))), 1);
        assert!(dispatcher.auth().missing().contains("rns", "/secret"));
    }

    #[test]
    fn missing_credentials_after_native_challenge_is_ignored() {
        let outcome = ProcessOutcome::MissingCredentials {
            riddle: Some("rns".to_owned()),
            realm: "Members".to_owned(),
            credentials_path: "/secret".to_owned(),
        };
        let (mut dispatcher, _backend) = bootstrapped(
            FakeBackend::answering(SECRET_PAGE, outcome),
            FakeHost::with_tab(TabId(2), SECRET_PAGE),
        );

        visit(&mut dispatcher, 2, SECRET_PAGE, 401);
        assert!(dispatcher.auth().missing().is_empty());
        assert!(dispatcher.host().calls().is_empty());
    }

    #[test]
    fn blacklisted_page_is_replaced_on_load() {
        let (mut dispatcher, _backend) = bootstrapped(FakeBackend::default(), FakeHost::default());
        let event = TrackerEvent::TabLoading {
            tab: TabId(6),
            url: "https://example.com/riddle/trap.html".to_owned(),
            active: false,
        };
        assert!(dispatcher.handle(event).is_continue());
        assert_eq!(
            dispatcher.host().calls(),
            vec![
                HostCall::Remove(TabId(6)),
                HostCall::Create("https://example.com/riddle/safe.htm".to_owned(), false),
            ]
        );
    }

    #[test]
    fn own_server_traffic_and_backend_failures_are_dropped() {
        let (mut dispatcher, backend) = new_dispatcher(FakeBackend::default(), FakeHost::default());
        visit(&mut dispatcher, 1, "https://www.riddler.app/process", 200);
        assert!(backend.calls().is_empty());

        visit(&mut dispatcher, 1, SECRET_PAGE, 200);
        assert_eq!(backend.calls(), vec![format!("process {SECRET_PAGE}")]);
        assert!(dispatcher.host().calls().is_empty());
    }

    #[test]
    fn response_burst_is_bounded_by_worker_count() {
        let config = TrackerConfig {
            backend_workers: 2,
            ..TrackerConfig::default()
        };
        let backend = FakeBackend {
            delay: Duration::from_millis(5),
            ..FakeBackend::default()
        };
        let (mut dispatcher, backend) = new_dispatcher_with(&config, backend, FakeHost::default());
        let sender = dispatcher.sender();
        for page in 0..24 {
            let event = TrackerEvent::ResponseCompleted {
                tab: TabId(1),
                response: VisitedResponse::new(
                    format!("https://example.com/riddle/burst/{page}.htm"),
                    200,
                ),
            };
            assert!(sender.send(event).is_ok());
        }

        assert!(dispatcher.run_until_idle().is_continue());
        assert_eq!(backend.calls().len(), 24);
        assert!(backend.peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn shutdown_stops_the_loop() {
        let (mut dispatcher, _backend) = new_dispatcher(FakeBackend::default(), FakeHost::default());
        let sender = dispatcher.sender();
        assert!(sender.send(TrackerEvent::Shutdown).is_ok());
        assert_eq!(dispatcher.run_until_idle(), ControlFlow::Break(()));
    }
}
