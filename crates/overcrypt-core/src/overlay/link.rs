//! Content access for overlay links.
//!
//! A [`BackendLink`] can expose a seekable handle, a range reader or a URL.
//! [`LinkReader`] settles on one of them and serves physical ranges from it;
//! [`RangeReadCloser`] puts the cipher on top and owns every resource the
//! link acquired.

use std::fmt;
use std::io::{self, SeekFrom};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::StatusCode;
use reqwest::header::RANGE;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{Mutex, OnceCell, OwnedMutexGuard};
use tracing::{debug, instrument, warn};
use url::Url;

use super::backend::{BackendError, BackendLink, RangeRead, SeekableRead};
use super::operations::{OverlayContext, OverlayError};
use crate::cipher::Cipher;
use crate::fs::size::{PhysicalRange, RangeRequest};
use crate::fs::streaming::{ByteStream, PhysicalOpener, StreamingContext, StreamingError};

/// Read size for seekable handles.
const HANDLE_READ_SIZE: usize = 64 * 1024;

// ============================================================================
// URL access
// ============================================================================

/// Turns a download URL into a range reader.
#[async_trait]
pub trait UrlOpener: Send + Sync {
    async fn open(&self, url: &Url, total_size: u64) -> Result<Arc<dyn RangeRead>, BackendError>;
}

/// Range reads over HTTP with `Range` headers.
#[derive(Debug, Clone, Default)]
pub struct HttpRangeOpener {
    client: reqwest::Client,
}

impl HttpRangeOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UrlOpener for HttpRangeOpener {
    async fn open(&self, url: &Url, _total_size: u64) -> Result<Arc<dyn RangeRead>, BackendError> {
        Ok(Arc::new(HttpRangeReader {
            client: self.client.clone(),
            url: url.clone(),
        }))
    }
}

struct HttpRangeReader {
    client: reqwest::Client,
    url: Url,
}

#[async_trait]
impl RangeRead for HttpRangeReader {
    #[instrument(level = "debug", skip(self), fields(url = %self.url))]
    async fn range_read(&self, range: PhysicalRange) -> Result<ByteStream, BackendError> {
        let header = match range.last_byte() {
            Some(last) => format!("bytes={}-{last}", range.offset),
            None => format!("bytes={}-", range.offset),
        };
        let response = self.client.get(self.url.clone()).header(RANGE, header).send().await?;

        let status = response.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            debug!(offset = range.offset, "Range starts past the end of the object");
            return Ok(stream::empty().boxed());
        }
        if !status.is_success() {
            return Err(BackendError::HttpStatus {
                status: status.as_u16(),
                url: self.url.to_string(),
            });
        }

        let body: ByteStream = response.bytes_stream().map_err(io::Error::other).boxed();
        if status == StatusCode::PARTIAL_CONTENT {
            return Ok(body);
        }
        // Full body: usable only when the range starts at zero
        if range.offset > 0 {
            return Err(BackendError::NotSupported {
                operation: format!("range requests against {}", self.url),
            });
        }
        debug!("Server ignored Range header, truncating full body");
        Ok(match range.length {
            Some(limit) => take_bytes(body, limit),
            None => body,
        })
    }
}

/// Yield at most `limit` bytes of `input`.
fn take_bytes(input: ByteStream, limit: u64) -> ByteStream {
    stream::try_unfold((input, limit), |(mut input, remaining)| async move {
        if remaining == 0 {
            return Ok::<_, io::Error>(None);
        }
        let Some(mut chunk) = input.try_next().await? else {
            return Ok(None);
        };
        if chunk.len() as u64 > remaining {
            chunk.truncate(remaining as usize);
        }
        let remaining = remaining - chunk.len() as u64;
        Ok(Some((chunk, (input, remaining))))
    })
    .boxed()
}

// ============================================================================
// Closers
// ============================================================================

/// Something a link has to release when it is done.
#[async_trait]
trait Closer: Send + Sync {
    async fn close(&self) -> Result<(), BackendError>;
}

type HandleCell = Option<Box<dyn SeekableRead>>;

/// A seekable handle shared by the streams of one link.
///
/// Only one stream holds the handle at a time. Closing never waits for that
/// stream: it marks the slot closed and the handle is dropped by whichever
/// side lets go of it last.
struct HandleSlot {
    handle: Arc<Mutex<HandleCell>>,
    closed: AtomicBool,
}

type SharedHandle = Arc<HandleSlot>;

impl HandleSlot {
    fn new(handle: Box<dyn SeekableRead>) -> Self {
        Self {
            handle: Arc::new(Mutex::new(Some(handle))),
            closed: AtomicBool::new(false),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Wait for exclusive use of the handle.
async fn acquire_handle(slot: &SharedHandle) -> io::Result<HandleGuard> {
    let guard = HandleGuard {
        guard: Arc::clone(&slot.handle).lock_owned().await,
        slot: Arc::clone(slot),
    };
    if slot.is_closed() {
        return Err(BackendError::Closed.into());
    }
    Ok(guard)
}

/// Exclusive use of the handle; drops it on release if the link was closed.
struct HandleGuard {
    guard: OwnedMutexGuard<HandleCell>,
    slot: SharedHandle,
}

impl HandleGuard {
    fn handle(&mut self) -> io::Result<&mut Box<dyn SeekableRead>> {
        if self.slot.is_closed() {
            return Err(BackendError::Closed.into());
        }
        self.guard.as_mut().ok_or_else(|| BackendError::Closed.into())
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        if self.slot.is_closed() {
            self.guard.take();
        }
    }
}

struct HandleCloser(SharedHandle);

#[async_trait]
impl Closer for HandleCloser {
    async fn close(&self) -> Result<(), BackendError> {
        self.0.closed.store(true, Ordering::SeqCst);
        // A live stream holding the handle drops it when it is released.
        if let Ok(mut handle) = self.0.handle.try_lock() {
            handle.take();
        }
        Ok(())
    }
}

struct ReaderCloser(Arc<dyn RangeRead>);

#[async_trait]
impl Closer for ReaderCloser {
    async fn close(&self) -> Result<(), BackendError> {
        self.0.close().await
    }
}

#[derive(Default)]
struct CloserSet {
    closers: Vec<Arc<dyn Closer>>,
    closed: bool,
}

// ============================================================================
// Physical reader
// ============================================================================

enum ContentSource {
    Seekable(SharedHandle),
    Ranged(Arc<dyn RangeRead>),
    Url {
        url: Url,
        opener: Arc<dyn UrlOpener>,
        reader: OnceCell<Arc<dyn RangeRead>>,
    },
}

impl ContentSource {
    fn name(&self) -> &'static str {
        match self {
            ContentSource::Seekable(_) => "seekable",
            ContentSource::Ranged(_) => "range_reader",
            ContentSource::Url { .. } => "url",
        }
    }
}

/// Serves physical ranges of one backend object from the best access mode it
/// offers.
///
/// Spans reaching the end of the object are requested open-ended. Reads from
/// a seekable handle are serialized: a stream holds the handle until dropped.
pub struct LinkReader {
    source: ContentSource,
    total_size: u64,
    closers: Arc<Mutex<CloserSet>>,
}

impl LinkReader {
    /// Pick an access mode: seekable handle, then range reader, then URL.
    ///
    /// Returns `None` when the link offers none of them.
    pub fn from_backend_link(link: BackendLink, url_opener: Arc<dyn UrlOpener>) -> Option<Self> {
        let mut set = CloserSet::default();
        let source = if let Some(handle) = link.handle {
            let handle: SharedHandle = Arc::new(HandleSlot::new(handle));
            set.closers.push(Arc::new(HandleCloser(Arc::clone(&handle))));
            ContentSource::Seekable(handle)
        } else if let Some(reader) = link.range_reader {
            set.closers.push(Arc::new(ReaderCloser(Arc::clone(&reader))));
            ContentSource::Ranged(reader)
        } else if let Some(url) = link.url {
            ContentSource::Url {
                url,
                opener: url_opener,
                reader: OnceCell::new(),
            }
        } else {
            return None;
        };
        debug!(access_mode = source.name(), total_size = link.total_size, "Selected access mode");

        Some(Self {
            source,
            total_size: link.total_size,
            closers: Arc::new(Mutex::new(set)),
        })
    }

    /// Physical size of the object.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn access_mode(&self) -> &'static str {
        self.source.name()
    }

    async fn url_reader(
        &self,
        url: &Url,
        opener: &Arc<dyn UrlOpener>,
        cell: &OnceCell<Arc<dyn RangeRead>>,
    ) -> Result<Arc<dyn RangeRead>, BackendError> {
        let reader = cell
            .get_or_try_init(|| async {
                let reader = opener.open(url, self.total_size).await?;
                let mut set = self.closers.lock().await;
                if set.closed {
                    drop(set);
                    reader.close().await?;
                    return Err(BackendError::Closed);
                }
                set.closers.push(Arc::new(ReaderCloser(Arc::clone(&reader))));
                Ok(reader)
            })
            .await?;
        Ok(Arc::clone(reader))
    }

    /// Release everything acquired so far. Later calls do nothing.
    pub async fn close(&self) -> Result<(), BackendError> {
        let closers = {
            let mut set = self.closers.lock().await;
            if set.closed {
                return Ok(());
            }
            set.closed = true;
            std::mem::take(&mut set.closers)
        };

        let mut first_error = None;
        for closer in closers {
            if let Err(e) = closer.close().await {
                warn!(error = %e, "Failed to release link resource");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl fmt::Debug for LinkReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkReader")
            .field("access_mode", &self.source.name())
            .field("total_size", &self.total_size)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PhysicalOpener for LinkReader {
    async fn open(&self, range: PhysicalRange) -> io::Result<ByteStream> {
        if self.closers.lock().await.closed {
            return Err(BackendError::Closed.into());
        }
        if range.offset >= self.total_size {
            debug!(offset = range.offset, total_size = self.total_size, "Range starts past the end");
            return Ok(stream::empty().boxed());
        }
        let range = range.clamp_to_end(self.total_size);
        match &self.source {
            ContentSource::Seekable(handle) => open_handle(handle, range).await,
            ContentSource::Ranged(reader) => Ok(reader.range_read(range).await?),
            ContentSource::Url { url, opener, reader } => {
                let reader = self.url_reader(url, opener, reader).await?;
                Ok(reader.range_read(range).await?)
            }
        }
    }
}

async fn open_handle(handle: &SharedHandle, range: PhysicalRange) -> io::Result<ByteStream> {
    let mut guard = acquire_handle(handle).await?;
    guard.handle()?.seek(SeekFrom::Start(range.offset)).await?;

    Ok(stream::try_unfold((guard, range.length), |(mut guard, remaining)| async move {
        if remaining == Some(0) {
            return Ok(None);
        }
        let file = guard.handle()?;
        let want = remaining.map_or(HANDLE_READ_SIZE, |r| r.min(HANDLE_READ_SIZE as u64) as usize);
        let mut buffer = vec![0u8; want];
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            return Ok(None);
        }
        buffer.truncate(read);
        let remaining = remaining.map(|r| r - read as u64);
        Ok(Some((Bytes::from(buffer), (guard, remaining))))
    })
    .boxed())
}

// ============================================================================
// Overlay links
// ============================================================================

/// Plaintext range access to one overlay file.
///
/// Owns the resources of the underlying link; [`close`](Self::close) releases
/// each of them exactly once. Readers obtained from it must not outlive it.
pub struct RangeReadCloser {
    reader: Arc<LinkReader>,
    cipher: Option<Arc<dyn Cipher>>,
    size: u64,
    context: OverlayContext,
}

impl RangeReadCloser {
    pub(crate) fn decrypting(reader: LinkReader, cipher: Arc<dyn Cipher>, size: u64, context: OverlayContext) -> Self {
        Self {
            reader: Arc::new(reader),
            cipher: Some(cipher),
            size,
            context,
        }
    }

    pub(crate) fn plain(reader: LinkReader, context: OverlayContext) -> Self {
        let size = reader.total_size();
        Self {
            reader: Arc::new(reader),
            cipher: None,
            size,
            context,
        }
    }

    /// Plaintext size of the file.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_decrypting(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn access_mode(&self) -> &'static str {
        self.reader.access_mode()
    }

    /// Read a plaintext range. `length: None` reads to the end of the file.
    #[instrument(level = "debug", skip(self), fields(path = %self.context, offset = request.offset, length = ?request.length))]
    pub async fn range_read(&self, request: RangeRequest) -> Result<ByteStream, OverlayError> {
        match &self.cipher {
            Some(cipher) => {
                let opener: Arc<dyn PhysicalOpener> = Arc::clone(&self.reader) as Arc<dyn PhysicalOpener>;
                Ok(cipher.decrypt_range(opener, request).await?)
            }
            None if request.is_empty() => Ok(stream::empty().boxed()),
            None => self
                .reader
                .open(PhysicalRange::new(request.offset, request.length))
                .await
                .map_err(|e| {
                    let context = StreamingContext::new()
                        .with_path(self.context.to_string())
                        .with_operation("range_read");
                    StreamingError::io_with_context(e, context).into()
                }),
        }
    }

    /// Release every resource of the link. Safe to call more than once.
    pub async fn close(&self) -> Result<(), OverlayError> {
        self.reader.close().await.map_err(|source| OverlayError::Backend {
            source,
            context: self.context.clone(),
        })
    }
}

impl fmt::Debug for RangeReadCloser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangeReadCloser")
            .field("reader", &self.reader)
            .field("decrypting", &self.cipher.is_some())
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// What [`Overlay::link`](super::Overlay::link) hands back.
#[derive(Debug)]
pub enum OverlayLink {
    /// Content is stored in plaintext; the backend link is usable as is.
    Passthrough(BackendLink),
    /// Content is decrypted on the fly.
    Decrypted(RangeReadCloser),
}

impl OverlayLink {
    /// A plaintext reader regardless of the link kind.
    pub fn into_reader(self, url_opener: Arc<dyn UrlOpener>, context: OverlayContext) -> Result<RangeReadCloser, OverlayError> {
        match self {
            OverlayLink::Decrypted(reader) => Ok(reader),
            OverlayLink::Passthrough(link) => LinkReader::from_backend_link(link, url_opener)
                .map(|reader| RangeReadCloser::plain(reader, context.clone()))
                .ok_or(OverlayError::UnsupportedAccessMode { context }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct VecReader {
        data: Bytes,
        ranges: std::sync::Mutex<Vec<PhysicalRange>>,
        closes: AtomicUsize,
    }

    impl VecReader {
        fn new(data: &[u8]) -> Arc<Self> {
            Arc::new(Self {
                data: Bytes::copy_from_slice(data),
                ranges: std::sync::Mutex::new(Vec::new()),
                closes: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RangeRead for VecReader {
        async fn range_read(&self, range: PhysicalRange) -> Result<ByteStream, BackendError> {
            self.ranges.lock().unwrap().push(range);
            let start = (range.offset as usize).min(self.data.len());
            let end = range
                .length
                .map_or(self.data.len(), |len| start.saturating_add(len as usize).min(self.data.len()));
            let chunk = self.data.slice(start..end);
            Ok(stream::once(async move { Ok(chunk) }).boxed())
        }

        async fn close(&self) -> Result<(), BackendError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FixedOpener(Arc<VecReader>);

    #[async_trait]
    impl UrlOpener for FixedOpener {
        async fn open(&self, _url: &Url, _total_size: u64) -> Result<Arc<dyn RangeRead>, BackendError> {
            Ok(Arc::clone(&self.0) as Arc<dyn RangeRead>)
        }
    }

    async fn collect(stream: ByteStream) -> Vec<u8> {
        stream
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
            .unwrap()
    }

    fn unused_opener() -> Arc<dyn UrlOpener> {
        Arc::new(HttpRangeOpener::new())
    }

    #[test]
    fn test_no_access_mode_yields_none() {
        assert!(LinkReader::from_backend_link(BackendLink::default(), unused_opener()).is_none());
    }

    #[tokio::test]
    async fn test_handle_preferred_over_reader() {
        let reader = VecReader::new(b"from reader");
        let link = BackendLink {
            handle: Some(Box::new(Cursor::new(b"from handle".to_vec()))),
            range_reader: Some(reader.clone()),
            url: None,
            total_size: 11,
        };
        let link_reader = LinkReader::from_backend_link(link, unused_opener()).unwrap();
        assert_eq!(link_reader.access_mode(), "seekable");
        let data = collect(link_reader.open(PhysicalRange::new(5, Some(3))).await.unwrap()).await;
        assert_eq!(data, b"han");
    }

    #[tokio::test]
    async fn test_range_reaching_end_is_open_ended() {
        let reader = VecReader::new(b"0123456789");
        let link = BackendLink {
            range_reader: Some(reader.clone()),
            total_size: 10,
            ..BackendLink::default()
        };
        let link_reader = LinkReader::from_backend_link(link, unused_opener()).unwrap();
        collect(link_reader.open(PhysicalRange::new(4, Some(6))).await.unwrap()).await;
        collect(link_reader.open(PhysicalRange::new(0, Some(3))).await.unwrap()).await;

        let ranges = reader.ranges.lock().unwrap().clone();
        assert_eq!(ranges, vec![PhysicalRange::new(4, None), PhysicalRange::new(0, Some(3))]);
    }

    #[tokio::test]
    async fn test_url_reader_materialized_once_and_closed_once() {
        let reader = VecReader::new(b"url content");
        let link = BackendLink {
            url: Some(Url::parse("http://backend.test/obj").unwrap()),
            total_size: 11,
            ..BackendLink::default()
        };
        let link_reader =
            LinkReader::from_backend_link(link, Arc::new(FixedOpener(reader.clone()))).unwrap();
        assert_eq!(link_reader.access_mode(), "url");

        assert_eq!(collect(link_reader.open(PhysicalRange::new(0, Some(3))).await.unwrap()).await, b"url");
        assert_eq!(collect(link_reader.open(PhysicalRange::new(4, None)).await.unwrap()).await, b"content");

        link_reader.close().await.unwrap();
        link_reader.close().await.unwrap();
        assert_eq!(reader.closes.load(Ordering::SeqCst), 1);
        assert!(link_reader.open(PhysicalRange::new(0, None)).await.is_err());
    }

    #[tokio::test]
    async fn test_close_releases_handle() {
        let link = BackendLink {
            handle: Some(Box::new(Cursor::new(vec![1u8; 16]))),
            total_size: 16,
            ..BackendLink::default()
        };
        let link_reader = LinkReader::from_backend_link(link, unused_opener()).unwrap();
        link_reader.close().await.unwrap();
        let err = link_reader.open(PhysicalRange::new(0, None)).await.err().unwrap();
        assert!(err.to_string().contains("closed"));
    }

    #[tokio::test]
    async fn test_take_bytes_truncates() {
        let input: ByteStream = stream::iter(vec![
            Ok(Bytes::from_static(b"abcd")),
            Ok(Bytes::from_static(b"efgh")),
        ])
        .boxed();
        assert_eq!(collect(take_bytes(input, 6)).await, b"abcdef");
    }

    #[tokio::test]
    async fn test_close_does_not_wait_for_live_stream() {
        let link = BackendLink {
            handle: Some(Box::new(Cursor::new(vec![7u8; 200_000]))),
            total_size: 200_000,
            ..BackendLink::default()
        };
        let link_reader = LinkReader::from_backend_link(link, unused_opener()).unwrap();
        let mut stream = link_reader.open(PhysicalRange::new(0, None)).await.unwrap();
        let first = stream.try_next().await.unwrap().unwrap();
        assert_eq!(first.len(), HANDLE_READ_SIZE);

        tokio::time::timeout(std::time::Duration::from_secs(5), link_reader.close())
            .await
            .expect("close waited for the stream")
            .unwrap();

        // The live stream stops at its next read, and the link stays closed.
        assert!(stream.try_next().await.is_err());
        drop(stream);
        assert!(link_reader.open(PhysicalRange::new(0, Some(4))).await.is_err());
    }

    #[tokio::test]
    async fn test_range_past_end_is_empty_in_every_mode() {
        let reader = VecReader::new(b"0123456789");
        let ranged = LinkReader::from_backend_link(
            BackendLink {
                range_reader: Some(reader.clone()),
                total_size: 10,
                ..BackendLink::default()
            },
            unused_opener(),
        )
        .unwrap();
        let seekable = LinkReader::from_backend_link(
            BackendLink {
                handle: Some(Box::new(Cursor::new(b"0123456789".to_vec()))),
                total_size: 10,
                ..BackendLink::default()
            },
            unused_opener(),
        )
        .unwrap();

        for link_reader in [&ranged, &seekable] {
            for range in [PhysicalRange::new(10, Some(5)), PhysicalRange::new(u64::MAX, None)] {
                assert!(collect(link_reader.open(range).await.unwrap()).await.is_empty());
            }
        }
        assert!(reader.ranges.lock().unwrap().is_empty());
    }

    /// Serve one canned HTTP response on a local port.
    async fn serve_once(response: &'static str) -> Url {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; 4096];
            let _ = socket.read(&mut request).await.unwrap();
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        Url::parse(&format!("http://{addr}/object")).unwrap()
    }

    #[tokio::test]
    async fn test_http_range_not_satisfiable_is_empty() {
        let url = serve_once(
            "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */10\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let reader = HttpRangeOpener::new().open(&url, 10).await.unwrap();
        let data = collect(reader.range_read(PhysicalRange::new(10, Some(5))).await.unwrap()).await;
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn test_http_error_status_is_reported() {
        let url = serve_once("HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;
        let reader = HttpRangeOpener::new().open(&url, 10).await.unwrap();
        let err = reader.range_read(PhysicalRange::new(0, Some(5))).await.err().unwrap();
        assert!(matches!(err, BackendError::HttpStatus { status: 403, .. }));
    }
}
