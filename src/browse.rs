use std::ops::Range;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tracing::debug;

use crate::config::Config;
use crate::error::Result;
use crate::models::Wallpaper;
use crate::repository::WallpaperRepository;

pub const DEFAULT_PAGE_SIZE: u32 = 150;

/// Page arithmetic over a flat item list. Pages are 1-based; page 0 means
/// nothing has been loaded yet. Moves past either edge are no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pager {
    page: u32,
    page_size: u32,
    total: usize,
}

impl Pager {
    pub fn new(page_size: u32) -> Self {
        Self {
            page: 0,
            page_size: page_size.max(1),
            total: 0,
        }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn page_count(&self) -> u32 {
        self.total.div_ceil(self.page_size as usize) as u32
    }

    /// New item set: total replaced, position back to "nothing loaded".
    pub fn reset(&mut self, total: usize) {
        self.total = total;
        self.page = 0;
    }

    pub fn next(&mut self) -> bool {
        if self.page < self.page_count() {
            self.page += 1;
            true
        } else {
            false
        }
    }

    pub fn prev(&mut self) -> bool {
        if self.page > 1 {
            self.page -= 1;
            true
        } else {
            false
        }
    }

    pub fn goto(&mut self, page: u32) -> bool {
        if page >= 1 && page <= self.page_count() {
            self.page = page;
            true
        } else {
            false
        }
    }

    /// Slice bounds of the current page within the item list. Page 0 is an
    /// empty range.
    pub fn bounds(&self) -> Range<usize> {
        if self.page == 0 {
            return 0..0;
        }
        let size = self.page_size as usize;
        let start = ((self.page as usize - 1) * size).min(self.total);
        let end = (start + size).min(self.total);
        start..end
    }
}

impl Default for Pager {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

/// Cooperative cancellation handle given to a page load. The token belongs
/// to one transition generation; it reads as cancelled as soon as a newer
/// transition starts.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<u64>,
    generation: u64,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() != self.generation
    }

    /// Waits until a newer transition supersedes this one.
    pub async fn cancelled(&mut self) {
        let generation = self.generation;
        // a closed channel means the session is gone, which cancels too
        let _ = self.rx.wait_for(|current| *current != generation).await;
    }
}

/// The seam where a consumer prepares a page for display, e.g. decoding
/// image thumbnails. Implementations must poll the token and back out
/// early when cancelled; the session will not abort them forcibly.
#[async_trait]
pub trait PageLoader: Send + Sync {
    async fn load_page(&self, wallpapers: &[Wallpaper], cancel: CancelToken) -> Result<()>;
}

/// Loader that displays nothing. Useful for tests and headless callers
/// that only want the paging state machine.
pub struct NoopLoader;

#[async_trait]
impl PageLoader for NoopLoader {
    async fn load_page(&self, _wallpapers: &[Wallpaper], _cancel: CancelToken) -> Result<()> {
        Ok(())
    }
}

struct SessionState {
    wallpapers: Vec<Wallpaper>,
    pager: Pager,
}

enum Move {
    Next,
    Prev,
    Goto(u32),
}

/// Paginated browsing over a retrieved wallpaper list.
///
/// Page transitions are serialized by a single async mutex so two
/// concurrent moves can never race on the page index or feed the loader
/// overlapping pages. Starting a transition bumps a generation counter
/// first, which flags the in-flight load's token as cancelled; the
/// superseded transition keeps its page move but reports `None`.
pub struct BrowseSession<L> {
    loader: L,
    state: Mutex<SessionState>,
    generation: watch::Sender<u64>,
}

impl<L: PageLoader> BrowseSession<L> {
    pub fn new(loader: L, page_size: u32) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            loader,
            state: Mutex::new(SessionState {
                wallpapers: Vec::new(),
                pager: Pager::new(page_size),
            }),
            generation,
        }
    }

    pub fn from_config(loader: L, config: &Config) -> Self {
        Self::new(loader, config.browse.page_size)
    }

    /// Re-retrieves the item set, optionally filtered, cancelling any
    /// in-flight page load. Paging resets to "nothing loaded"; the caller
    /// follows up with [`next_page`](Self::next_page) to show page 1.
    /// Returns the new item count.
    pub async fn refresh(
        &self,
        repository: &dyn WallpaperRepository,
        search: Option<&str>,
    ) -> Result<usize> {
        self.bump_generation();
        let items = match search {
            Some(term) => repository.search_wallpapers(term).await?,
            None => repository.wallpapers().await?,
        };
        let mut state = self.state.lock().await;
        let total = items.len();
        state.wallpapers = items;
        state.pager.reset(total);
        debug!(total, "browse session refreshed");
        Ok(total)
    }

    /// Moves to the next page and runs the loader on it. `Ok(None)` means
    /// the move was a no-op (already at the edge) or the load was
    /// superseded by a newer transition before it finished.
    pub async fn next_page(&self) -> Result<Option<u32>> {
        self.transition(Move::Next).await
    }

    pub async fn prev_page(&self) -> Result<Option<u32>> {
        self.transition(Move::Prev).await
    }

    pub async fn goto_page(&self, page: u32) -> Result<Option<u32>> {
        self.transition(Move::Goto(page)).await
    }

    /// Snapshot of the current paging state.
    pub async fn pager(&self) -> Pager {
        self.state.lock().await.pager
    }

    /// The current page's items, cloned out for display.
    pub async fn page_items(&self) -> Vec<Wallpaper> {
        let state = self.state.lock().await;
        let bounds = state.pager.bounds();
        state.wallpapers[bounds].to_vec()
    }

    async fn transition(&self, mv: Move) -> Result<Option<u32>> {
        // bump before taking the lock so the transition currently holding
        // it sees the cancellation and unwinds
        let token = self.bump_generation();
        let mut state = self.state.lock().await;
        let moved = match mv {
            Move::Next => state.pager.next(),
            Move::Prev => state.pager.prev(),
            Move::Goto(page) => state.pager.goto(page),
        };
        if !moved {
            return Ok(None);
        }
        let page = state.pager.page();
        let bounds = state.pager.bounds();
        let result = self
            .loader
            .load_page(&state.wallpapers[bounds], token.clone())
            .await;
        if token.is_cancelled() {
            debug!(page, "page load superseded");
            return Ok(None);
        }
        result.map(|()| Some(page))
    }

    fn bump_generation(&self) -> CancelToken {
        let mut generation = 0;
        self.generation.send_modify(|g| {
            *g += 1;
            generation = *g;
        });
        CancelToken {
            rx: self.generation.subscribe(),
            generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Franchise, Person};
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};
    use tokio::sync::Notify;

    fn papers(n: usize) -> Vec<Wallpaper> {
        (0..n)
            .map(|i| Wallpaper::from_disk(Path::new(&format!("/walls/{i:04}.png"))))
            .collect()
    }

    /// In-memory stand-in for the SQL + disk repository.
    struct FixedRepository {
        wallpapers: Vec<Wallpaper>,
    }

    #[async_trait]
    impl WallpaperRepository for FixedRepository {
        async fn wallpapers(&self) -> Result<Vec<Wallpaper>> {
            Ok(self.wallpapers.clone())
        }

        async fn search_wallpapers(&self, term: &str) -> Result<Vec<Wallpaper>> {
            let term = term.to_lowercase();
            Ok(self
                .wallpapers
                .iter()
                .filter(|w| w.file_name.to_lowercase().contains(&term))
                .cloned()
                .collect())
        }

        async fn people(&self) -> Result<Vec<Person>> {
            Ok(Vec::new())
        }

        async fn search_people(&self, _term: &str) -> Result<Vec<Person>> {
            Ok(Vec::new())
        }

        async fn franchises(&self) -> Result<Vec<Franchise>> {
            Ok(Vec::new())
        }

        async fn search_franchises(&self, _term: &str) -> Result<Vec<Franchise>> {
            Ok(Vec::new())
        }

        async fn franchises_for_person(&self, _person_id: i64) -> Result<Vec<Franchise>> {
            Ok(Vec::new())
        }

        async fn save_wallpaper(&self, _wallpaper: &Wallpaper) -> Result<i64> {
            Ok(1)
        }

        async fn save_person(&self, _person: &Person) -> Result<i64> {
            Ok(1)
        }

        async fn save_franchises(&self, _franchises: &[Franchise]) -> Result<Vec<i64>> {
            Ok(Vec::new())
        }

        async fn delete_person(&self, _id: i64) -> Result<()> {
            Ok(())
        }

        async fn delete_franchise(&self, _id: i64) -> Result<bool> {
            Ok(true)
        }

        async fn soft_delete_wallpaper(&self, _id: i64) -> Result<bool> {
            Ok(true)
        }

        async fn trim_wallpapers(&self) -> Result<u32> {
            Ok(0)
        }
    }

    /// Records the size of every page slice handed to it.
    #[derive(Clone, Default)]
    struct RecordingLoader {
        pages: Arc<StdMutex<Vec<usize>>>,
    }

    #[async_trait]
    impl PageLoader for RecordingLoader {
        async fn load_page(&self, wallpapers: &[Wallpaper], _cancel: CancelToken) -> Result<()> {
            self.pages.lock().unwrap().push(wallpapers.len());
            Ok(())
        }
    }

    /// Parks inside the first load until cancelled, signalling entry.
    #[derive(Clone)]
    struct ParkingLoader {
        park_first: Arc<AtomicBool>,
        entered: Arc<Notify>,
        saw_cancel: Arc<AtomicBool>,
    }

    impl ParkingLoader {
        fn new() -> Self {
            Self {
                park_first: Arc::new(AtomicBool::new(true)),
                entered: Arc::new(Notify::new()),
                saw_cancel: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    #[async_trait]
    impl PageLoader for ParkingLoader {
        async fn load_page(&self, _wallpapers: &[Wallpaper], mut cancel: CancelToken) -> Result<()> {
            if self.park_first.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                cancel.cancelled().await;
                self.saw_cancel.store(true, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    /// Flags any overlapping load invocations.
    #[derive(Clone, Default)]
    struct OverlapProbe {
        in_flight: Arc<AtomicBool>,
        overlapped: Arc<AtomicBool>,
        calls: Arc<StdMutex<Vec<u32>>>,
    }

    #[async_trait]
    impl PageLoader for OverlapProbe {
        async fn load_page(&self, wallpapers: &[Wallpaper], _cancel: CancelToken) -> Result<()> {
            if self.in_flight.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            self.calls.lock().unwrap().push(wallpapers.len() as u32);
            for _ in 0..3 {
                tokio::task::yield_now().await;
            }
            self.in_flight.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_pager_starts_unloaded() {
        let mut pager = Pager::default();
        assert_eq!(pager.page_size(), DEFAULT_PAGE_SIZE);
        assert_eq!(pager.page(), 0);
        assert_eq!(pager.page_count(), 0);
        assert_eq!(pager.bounds(), 0..0);
        // nothing to move onto
        assert!(!pager.next());
        assert!(!pager.prev());
    }

    #[test]
    fn test_pager_next_prev_clamp() {
        let mut pager = Pager::new(150);
        pager.reset(450);
        assert_eq!(pager.page_count(), 3);

        assert!(pager.next());
        assert!(pager.next());
        assert!(pager.next());
        assert_eq!(pager.page(), 3);
        assert!(!pager.next());
        assert_eq!(pager.page(), 3);

        assert!(pager.prev());
        assert!(pager.prev());
        assert_eq!(pager.page(), 1);
        assert!(!pager.prev());
        assert_eq!(pager.page(), 1);
    }

    #[test]
    fn test_pager_partial_last_page_bounds() {
        let mut pager = Pager::new(150);
        pager.reset(310);
        assert_eq!(pager.page_count(), 3);

        assert!(pager.goto(3));
        assert_eq!(pager.bounds(), 300..310);
        assert!(pager.goto(1));
        assert_eq!(pager.bounds(), 0..150);
    }

    #[test]
    fn test_pager_goto_out_of_range() {
        let mut pager = Pager::new(10);
        pager.reset(25);
        assert!(!pager.goto(0));
        assert!(!pager.goto(4));
        assert!(pager.goto(3));
        assert_eq!(pager.bounds(), 20..25);
    }

    #[test]
    fn test_pager_reset_clears_position() {
        let mut pager = Pager::new(10);
        pager.reset(100);
        pager.goto(5);
        pager.reset(30);
        assert_eq!(pager.page(), 0);
        assert_eq!(pager.total(), 30);
        assert_eq!(pager.page_count(), 3);
    }

    #[test]
    fn test_pager_zero_size_clamped() {
        let pager = Pager::new(0);
        assert_eq!(pager.page_size(), 1);
    }

    #[tokio::test]
    async fn test_session_pages_through_items() {
        let loader = RecordingLoader::default();
        let session = BrowseSession::new(loader.clone(), 2);
        let repo = FixedRepository {
            wallpapers: papers(5),
        };

        assert_eq!(session.refresh(&repo, None).await.unwrap(), 5);
        assert_eq!(session.pager().await.page(), 0);

        assert_eq!(session.next_page().await.unwrap(), Some(1));
        assert_eq!(session.next_page().await.unwrap(), Some(2));
        assert_eq!(session.next_page().await.unwrap(), Some(3));
        assert_eq!(session.next_page().await.unwrap(), None);
        assert_eq!(session.pager().await.page(), 3);

        assert_eq!(*loader.pages.lock().unwrap(), vec![2, 2, 1]);
        assert_eq!(session.page_items().await.len(), 1);
    }

    #[tokio::test]
    async fn test_session_empty_set_never_loads() {
        let loader = RecordingLoader::default();
        let session = BrowseSession::new(loader.clone(), 150);
        let repo = FixedRepository {
            wallpapers: Vec::new(),
        };

        assert_eq!(session.refresh(&repo, None).await.unwrap(), 0);
        assert_eq!(session.next_page().await.unwrap(), None);
        assert_eq!(session.prev_page().await.unwrap(), None);
        assert!(loader.pages.lock().unwrap().is_empty());
        assert!(session.page_items().await.is_empty());
    }

    #[tokio::test]
    async fn test_session_search_refresh_filters() {
        let session = BrowseSession::new(NoopLoader, 150);
        let mut wallpapers = papers(3);
        wallpapers.push(Wallpaper::from_disk(Path::new("/walls/beach.png")));
        let repo = FixedRepository { wallpapers };

        assert_eq!(session.refresh(&repo, Some("beach")).await.unwrap(), 1);
        session.next_page().await.unwrap();
        let items = session.page_items().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].file_name, "beach.png");
    }

    #[tokio::test]
    async fn test_refresh_resets_paging() {
        let session = BrowseSession::new(NoopLoader, 150);
        let repo = FixedRepository {
            wallpapers: papers(300),
        };

        session.refresh(&repo, None).await.unwrap();
        session.next_page().await.unwrap();
        assert_eq!(session.pager().await.page(), 1);

        let smaller = FixedRepository {
            wallpapers: papers(10),
        };
        session.refresh(&smaller, None).await.unwrap();
        let pager = session.pager().await;
        assert_eq!(pager.page(), 0);
        assert_eq!(pager.total(), 10);
    }

    #[tokio::test]
    async fn test_new_transition_cancels_in_flight() {
        let loader = ParkingLoader::new();
        let session = Arc::new(BrowseSession::new(loader.clone(), 150));
        let repo = FixedRepository {
            wallpapers: papers(300),
        };
        session.refresh(&repo, None).await.unwrap();

        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.next_page().await })
        };
        // the first transition is parked inside its load, holding the lock
        loader.entered.notified().await;

        let second = session.next_page().await.unwrap();
        assert_eq!(second, Some(2));

        // superseded: the page move stood, but the load reported nothing
        let first = first.await.unwrap().unwrap();
        assert_eq!(first, None);
        assert!(loader.saw_cancel.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_refresh_cancels_in_flight_load() {
        let loader = ParkingLoader::new();
        let session = Arc::new(BrowseSession::new(loader.clone(), 150));
        let repo = FixedRepository {
            wallpapers: papers(300),
        };
        session.refresh(&repo, None).await.unwrap();

        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.next_page().await })
        };
        loader.entered.notified().await;

        let smaller = FixedRepository {
            wallpapers: papers(10),
        };
        assert_eq!(session.refresh(&smaller, None).await.unwrap(), 10);

        assert_eq!(first.await.unwrap().unwrap(), None);
        assert!(loader.saw_cancel.load(Ordering::SeqCst));
        let pager = session.pager().await;
        assert_eq!(pager.page(), 0);
        assert_eq!(pager.total(), 10);
    }

    #[tokio::test]
    async fn test_transitions_never_overlap() {
        let probe = OverlapProbe::default();
        let session = Arc::new(BrowseSession::new(probe.clone(), 150));
        let repo = FixedRepository {
            wallpapers: papers(1500),
        };
        session.refresh(&repo, None).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let session = session.clone();
            handles.push(tokio::spawn(async move { session.next_page().await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(!probe.overlapped.load(Ordering::SeqCst));
        assert_eq!(probe.calls.lock().unwrap().len(), 10);
        assert_eq!(session.pager().await.page(), 10);
    }
}
