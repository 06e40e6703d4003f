//! In-memory stand-ins for the backend traits, with call counters and gates
//! for holding calls in flight.

use crate::backend::{BackendError, HttpBackend, StaticCredential};
use crate::config::HttpSettings;
use crate::models::{CreateListingRequest, ListingEntry, Platform, SocialPost};
use crate::pipeline::{ListingService, MediaExtractor, PostSource};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};
use tokio::sync::watch;
use wiremock::MockServer;

pub fn backend_for(server: &MockServer, token: Option<&str>) -> HttpBackend {
    HttpBackend::new(
        &server.uri(),
        Arc::new(StaticCredential::new(token.map(str::to_string))),
        &HttpSettings::default(),
    )
    .expect("backend")
}

pub fn listing(product_id: &str, approved: bool) -> ListingEntry {
    let created_at = Utc
        .with_ymd_and_hms(2025, 1, 10, 12, 0, 0)
        .single()
        .expect("timestamp");
    ListingEntry {
        product_id: product_id.to_string(),
        title: format!("Listing {product_id}"),
        price: "19.99".into(),
        description: "Imported from a social post.".into(),
        about_item: String::new(),
        images: vec![format!("https://cdn.example.com/{product_id}.jpg")],
        details: BTreeMap::new(),
        created_at,
        updated_at: created_at,
        approved,
    }
}

/// Blocks calls until opened.
#[derive(Clone)]
pub struct Gate(Arc<watch::Sender<bool>>);

impl Gate {
    fn new() -> Self {
        Self(Arc::new(watch::channel(false).0))
    }

    pub fn open(&self) {
        self.0.send_replace(true);
    }

    async fn wait(&self) {
        let mut rx = self.0.subscribe();
        let _ = rx.wait_for(|open| *open).await;
    }
}

struct Counter(watch::Sender<usize>);

impl Counter {
    fn new() -> Self {
        Self(watch::channel(0).0)
    }

    fn bump(&self) {
        self.0.send_modify(|count| *count += 1);
    }

    fn get(&self) -> usize {
        *self.0.borrow()
    }

    async fn wait_for(&self, n: usize) {
        let mut rx = self.0.subscribe();
        let _ = rx.wait_for(|count| *count >= n).await;
    }
}

pub struct FakeBackend {
    posts: Mutex<HashMap<Platform, Vec<SocialPost>>>,
    extractions: Mutex<HashMap<String, Vec<String>>>,
    listings: Mutex<Vec<ListingEntry>>,
    fetch_gate: Mutex<Option<Gate>>,
    create_gate: Mutex<Option<Gate>>,
    update_gate: Mutex<Option<Gate>>,
    list_gate: Mutex<Option<Gate>>,
    fail_fetches: AtomicBool,
    fail_creates: AtomicBool,
    fail_updates: AtomicBool,
    reject_updates: AtomicBool,
    fetches: Counter,
    extracts: Counter,
    creates: Counter,
    updates: Counter,
    lists: Counter,
    next_id: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            posts: Mutex::new(HashMap::new()),
            extractions: Mutex::new(HashMap::new()),
            listings: Mutex::new(Vec::new()),
            fetch_gate: Mutex::new(None),
            create_gate: Mutex::new(None),
            update_gate: Mutex::new(None),
            list_gate: Mutex::new(None),
            fail_fetches: AtomicBool::new(false),
            fail_creates: AtomicBool::new(false),
            fail_updates: AtomicBool::new(false),
            reject_updates: AtomicBool::new(false),
            fetches: Counter::new(),
            extracts: Counter::new(),
            creates: Counter::new(),
            updates: Counter::new(),
            lists: Counter::new(),
            next_id: AtomicUsize::new(0),
        }
    }

    pub fn set_posts(&self, platform: Platform, posts: Vec<SocialPost>) {
        lock(&self.posts).insert(platform, posts);
    }

    pub fn set_extraction(&self, video_url: &str, images: Vec<&str>) {
        lock(&self.extractions).insert(
            video_url.to_string(),
            images.into_iter().map(str::to_string).collect(),
        );
    }

    pub fn insert_listing(&self, entry: ListingEntry) {
        lock(&self.listings).push(entry);
    }

    pub fn replace_listings(&self, entries: Vec<ListingEntry>) {
        *lock(&self.listings) = entries;
    }

    pub fn stored_listings(&self) -> Vec<ListingEntry> {
        lock(&self.listings).clone()
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn reject_updates(&self, reject: bool) {
        self.reject_updates.store(reject, Ordering::SeqCst);
    }

    pub fn gate_fetches(&self) -> Gate {
        install(&self.fetch_gate)
    }

    pub fn gate_creates(&self) -> Gate {
        install(&self.create_gate)
    }

    pub fn gate_updates(&self) -> Gate {
        install(&self.update_gate)
    }

    /// Holds only the next list call. It answers with the listings stored
    /// when it was made, not when the gate opens.
    pub fn gate_next_list(&self) -> Gate {
        install(&self.list_gate)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetches.get()
    }

    pub fn extract_calls(&self) -> usize {
        self.extracts.get()
    }

    pub fn create_calls(&self) -> usize {
        self.creates.get()
    }

    pub fn update_calls(&self) -> usize {
        self.updates.get()
    }

    pub fn list_calls(&self) -> usize {
        self.lists.get()
    }

    pub async fn wait_for_fetches(&self, n: usize) {
        self.fetches.wait_for(n).await;
    }

    pub async fn wait_for_creates(&self, n: usize) {
        self.creates.wait_for(n).await;
    }

    pub async fn wait_for_updates(&self, n: usize) {
        self.updates.wait_for(n).await;
    }

    pub async fn wait_for_lists(&self, n: usize) {
        self.lists.wait_for(n).await;
    }
}

#[async_trait]
impl PostSource for FakeBackend {
    async fn fetch_latest(&self, platform: Platform) -> Result<Vec<SocialPost>, BackendError> {
        self.fetches.bump();
        pass(&self.fetch_gate).await;
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(BackendError::Status {
                status: 503,
                body: "upstream unavailable".into(),
            });
        }
        Ok(lock(&self.posts).get(&platform).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl MediaExtractor for FakeBackend {
    async fn extract_images(&self, video_url: &str) -> Result<Vec<String>, BackendError> {
        self.extracts.bump();
        lock(&self.extractions)
            .get(video_url)
            .cloned()
            .ok_or_else(|| BackendError::Rejected(format!("no frames for {video_url}")))
    }
}

#[async_trait]
impl ListingService for FakeBackend {
    async fn create_listing(
        &self,
        request: &CreateListingRequest,
    ) -> Result<ListingEntry, BackendError> {
        self.creates.bump();
        pass(&self.create_gate).await;
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(BackendError::Request("connection reset".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let entry = ListingEntry {
            product_id: format!("prod-{id}"),
            title: format!("Listing for {}", request.post_link),
            price: String::new(),
            description: request.description.clone(),
            about_item: String::new(),
            images: request.images.clone(),
            details: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            approved: false,
        };
        lock(&self.listings).push(entry.clone());
        Ok(entry)
    }

    async fn list_listings(&self) -> Result<Vec<ListingEntry>, BackendError> {
        self.lists.bump();
        let listings = self.stored_listings();
        let gate = lock(&self.list_gate).take();
        if let Some(gate) = gate {
            gate.wait().await;
        }
        Ok(listings)
    }

    async fn update_listing(&self, entry: &ListingEntry) -> Result<ListingEntry, BackendError> {
        self.updates.bump();
        pass(&self.update_gate).await;
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(BackendError::Request("connection reset".into()));
        }
        if self.reject_updates.load(Ordering::SeqCst) {
            return Err(BackendError::Status {
                status: 422,
                body: "invalid listing".into(),
            });
        }
        let mut listings = lock(&self.listings);
        let stored = listings
            .iter_mut()
            .find(|stored| stored.product_id == entry.product_id)
            .ok_or_else(|| BackendError::Status {
                status: 404,
                body: format!("no listing {}", entry.product_id),
            })?;
        *stored = ListingEntry {
            updated_at: Utc::now(),
            ..entry.clone()
        };
        Ok(stored.clone())
    }

    async fn latest_listing(&self) -> Result<Option<ListingEntry>, BackendError> {
        Ok(lock(&self.listings).last().cloned())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn install(slot: &Mutex<Option<Gate>>) -> Gate {
    let gate = Gate::new();
    *lock(slot) = Some(gate.clone());
    gate
}

async fn pass(slot: &Mutex<Option<Gate>>) {
    let gate = lock(slot).clone();
    if let Some(gate) = gate {
        gate.wait().await;
    }
}
