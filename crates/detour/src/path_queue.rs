use crate::{NavMeshQuery, PolyRef, QueryFilter, Status};
use nav_common::Vec3;

/// Number of concurrent requests the queue can hold
pub const PATH_QUEUE_MAX_REQUESTS: usize = 8;
/// Number of updates a finished result is kept before its slot is recycled
const MAX_KEEP_ALIVE: u32 = 2;

/// Handle of a path request. Handles are never zero.
pub type PathQueueRef = u32;

#[derive(Debug, Clone)]
struct PathQuery {
    reference: Option<PathQueueRef>,
    start_pos: Vec3,
    end_pos: Vec3,
    start_ref: PolyRef,
    end_ref: PolyRef,
    path: Vec<PolyRef>,
    status: Status,
    keep_alive: u32,
    filter: QueryFilter,
}

impl Default for PathQuery {
    fn default() -> Self {
        Self {
            reference: None,
            start_pos: Vec3::ZERO,
            end_pos: Vec3::ZERO,
            start_ref: PolyRef::NULL,
            end_ref: PolyRef::NULL,
            path: Vec::new(),
            status: Status::Failure,
            keep_alive: 0,
            filter: QueryFilter::default(),
        }
    }
}

/// Asynchronous path request service.
///
/// Requests are queued with [`PathQueue::request`] and processed by
/// [`PathQueue::update`] within an iteration budget. Each request is searched to
/// completion in one go; the budget decides how many requests run per update,
/// the first request of an update always runs. Callers poll
/// [`PathQueue::request_status`] and fetch finished paths with
/// [`PathQueue::path_result`], which frees the slot. Results that are not
/// fetched are dropped after a couple of updates.
#[derive(Debug, Clone)]
pub struct PathQueue {
    queue: [PathQuery; PATH_QUEUE_MAX_REQUESTS],
    next_handle: PathQueueRef,
    max_path_size: usize,
    queue_head: usize,
}

impl PathQueue {
    /// Creates an empty queue whose results hold at most `max_path_size` polygons
    pub fn new(max_path_size: usize) -> Self {
        Self {
            queue: Default::default(),
            next_handle: 1,
            max_path_size,
            queue_head: 0,
        }
    }

    /// Runs pending requests in turn until the searches have spent `max_iters`
    /// iterations in total.
    ///
    /// A search is never cut short by the budget. Once the budget is used up the
    /// remaining requests wait for the next update.
    pub fn update<Q: NavMeshQuery + ?Sized>(&mut self, navquery: &Q, max_iters: usize) {
        let mut iter_count = max_iters as i64;

        for _ in 0..PATH_QUEUE_MAX_REQUESTS {
            let idx = self.queue_head % PATH_QUEUE_MAX_REQUESTS;
            let query = &mut self.queue[idx];

            if query.reference.is_none() {
                self.queue_head += 1;
                continue;
            }

            // Finished results wait for the owner a few updates, then the slot is recycled.
            if !query.status.is_in_progress() {
                query.keep_alive += 1;
                if query.keep_alive > MAX_KEEP_ALIVE {
                    log::debug!(
                        "path request {:?} expired before its result was read",
                        query.reference
                    );
                    query.reference = None;
                    query.status = Status::Failure;
                }
                self.queue_head += 1;
                continue;
            }

            match navquery.find_path(
                query.start_ref,
                query.end_ref,
                query.start_pos,
                query.end_pos,
                &query.filter,
                self.max_path_size,
            ) {
                Ok(result) if !result.path.is_empty() => {
                    iter_count -= result.iterations.max(1) as i64;
                    query.status = if result.partial {
                        Status::PartialResult
                    } else {
                        Status::Success
                    };
                    query.path = result.path;
                }
                Ok(_) => {
                    iter_count -= 1;
                    query.status = Status::Failure;
                }
                Err(err) => {
                    log::debug!("path request {:?} failed: {err}", query.reference);
                    iter_count -= 1;
                    query.status = Status::Failure;
                }
            }

            if iter_count <= 0 {
                break;
            }
            self.queue_head += 1;
        }
    }

    /// Queues a path request. Returns `None` when the queue is full.
    pub fn request(
        &mut self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: Vec3,
        end_pos: Vec3,
        filter: &QueryFilter,
    ) -> Option<PathQueueRef> {
        let Some(slot) = self.queue.iter().position(|q| q.reference.is_none()) else {
            log::warn!("path queue is full");
            return None;
        };

        let reference = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1);
        if self.next_handle == 0 {
            self.next_handle = 1;
        }

        let query = &mut self.queue[slot];
        query.reference = Some(reference);
        query.start_ref = start_ref;
        query.end_ref = end_ref;
        query.start_pos = start_pos;
        query.end_pos = end_pos;
        query.status = Status::InProgress;
        query.keep_alive = 0;
        query.filter = filter.clone();
        query.path.clear();

        Some(reference)
    }

    /// Status of a request. Unknown handles report [`Status::NotFound`].
    pub fn request_status(&self, reference: PathQueueRef) -> Status {
        self.queue
            .iter()
            .find(|q| q.reference == Some(reference))
            .map(|q| q.status)
            .unwrap_or(Status::NotFound)
    }

    /// Takes the result of a finished request and frees its slot.
    ///
    /// The returned path is truncated to `max_path` polygons.
    pub fn path_result(&mut self, reference: PathQueueRef, max_path: usize) -> (Status, Vec<PolyRef>) {
        let Some(query) = self
            .queue
            .iter_mut()
            .find(|q| q.reference == Some(reference))
        else {
            return (Status::NotFound, Vec::new());
        };

        let status = query.status;
        if status.is_in_progress() {
            return (status, Vec::new());
        }

        let mut path = std::mem::take(&mut query.path);
        path.truncate(max_path);
        query.reference = None;
        query.status = Status::Failure;
        query.keep_alive = 0;
        (status, path)
    }

    /// Number of occupied request slots
    pub fn pending_count(&self) -> usize {
        self.queue.iter().filter(|q| q.reference.is_some()).count()
    }

    /// Drops all requests
    pub fn purge(&mut self) {
        for query in &mut self.queue {
            query.reference = None;
            query.status = Status::Failure;
            query.keep_alive = 0;
            query.path.clear();
        }
        self.queue_head = 0;
    }
}
