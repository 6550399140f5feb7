//! Load and save jobs with cancellable handles and a completion callback.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use redlilium_stream::ByteStream;
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::codec::{ReadFormat, StreamFormat};
use crate::config::ObjectStreamConfig;
use crate::filter::FilterDescriptor;
use crate::reader::{self, InplaceRootProvider, LoadedRoot, ObjectStreamReader};
use crate::registry::{ClassDescriptor, Reflect, TypeRegistry};
use crate::writer::ObjectStreamWriter;

/// Fired exactly once when a job finishes, fails, is cancelled, or is
/// dropped without running.
pub type CompletionCb = Box<dyn FnOnce(JobHandle, bool) + Send>;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);
static JOBS: Mutex<BTreeMap<u64, Weak<JobState>>> = parking_lot::const_mutex(BTreeMap::new());

/// Shared between a job and the job table.
struct JobState {
    token: CancellationToken,
    outstanding: Arc<AtomicUsize>,
}

/// Non-owning reference to a live job.
///
/// Handles stay valid to copy around after the job is gone; operations on
/// them then simply report that the job no longer exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobHandle(u64);

impl JobHandle {
    pub fn id(self) -> u64 {
        self.0
    }

    pub fn is_alive(self) -> bool {
        lookup(self).is_some()
    }

    /// Request cancellation. Returns `false` if the job already finished.
    pub fn cancel(self) -> bool {
        match lookup(self) {
            Some(state) => {
                state.token.cancel();
                log::debug!("Cancellation requested for object stream job {}", self.0);
                true
            }
            None => false,
        }
    }
}

fn lookup(handle: JobHandle) -> Option<Arc<JobState>> {
    JOBS.lock().get(&handle.0).and_then(Weak::upgrade)
}

fn unregister(handle: JobHandle) {
    JOBS.lock().remove(&handle.0);
}

enum JobMode {
    Load {
        filter: FilterDescriptor,
        format: ReadFormat,
    },
    Save {
        format: StreamFormat,
    },
}

/// One load or save operation.
///
/// The job runs once, consuming itself, either on the calling thread
/// ([`run_load`](Self::run_load), [`run_save`](Self::run_save)) or on a
/// dedicated thread ([`spawn_load`](Self::spawn_load),
/// [`spawn_save`](Self::spawn_save)). Cancellation through its
/// [`JobHandle`] is observed between roots.
pub struct ObjectStreamJob {
    handle: JobHandle,
    state: Arc<JobState>,
    mode: JobMode,
    config: ObjectStreamConfig,
    completion: Option<CompletionCb>,
}

impl ObjectStreamJob {
    /// A load job with the given filter.
    pub fn load(
        filter: FilterDescriptor,
        completion: impl FnOnce(JobHandle, bool) + Send + 'static,
    ) -> Self {
        Self::new(
            JobMode::Load {
                filter,
                format: ReadFormat::Auto,
            },
            Box::new(completion),
        )
    }

    /// A save job writing `format`.
    pub fn save(
        format: StreamFormat,
        completion: impl FnOnce(JobHandle, bool) + Send + 'static,
    ) -> Self {
        Self::new(JobMode::Save { format }, Box::new(completion))
    }

    fn new(mode: JobMode, completion: CompletionCb) -> Self {
        let handle = JobHandle(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed));
        let state = Arc::new(JobState {
            token: CancellationToken::new(),
            outstanding: Arc::new(AtomicUsize::new(0)),
        });
        JOBS.lock().insert(handle.0, Arc::downgrade(&state));
        Self {
            handle,
            state,
            mode,
            config: ObjectStreamConfig::default(),
            completion: Some(completion),
        }
    }

    /// Strictness, depth limit and pretty printing for this job. A save job
    /// keeps its own format.
    pub fn with_config(mut self, config: ObjectStreamConfig) -> Self {
        self.config = config;
        self
    }

    /// Read a specific format instead of detecting it. Ignored by save jobs.
    pub fn with_read_format(mut self, read_format: impl Into<ReadFormat>) -> Self {
        if let JobMode::Load { format, .. } = &mut self.mode {
            *format = read_format.into();
        }
        self
    }

    pub fn handle(&self) -> JobHandle {
        self.handle
    }

    pub fn is_load(&self) -> bool {
        matches!(self.mode, JobMode::Load { .. })
    }

    /// Roots decoded but not yet handed out. Zero before a load starts.
    pub fn outstanding_roots(&self) -> usize {
        self.state.outstanding.load(Ordering::Acquire)
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.token.is_cancelled()
    }

    /// Run a load job on the calling thread.
    pub fn run_load<F>(
        self,
        stream: &mut dyn ByteStream,
        registry: &TypeRegistry,
        class_ready: F,
        inplace: Option<&mut dyn InplaceRootProvider>,
    ) -> bool
    where
        F: FnMut(LoadedRoot, Uuid, &TypeRegistry),
    {
        let success = match &self.mode {
            JobMode::Load { filter, format } => {
                let filter = filter
                    .clone()
                    .with_flags(filter.flags() | self.config.filter_flags());
                let outcome = ObjectStreamReader::new(registry, filter)
                    .with_format(*format)
                    .with_max_depth(self.config.max_depth)
                    .with_cancellation(self.state.token.clone())
                    .with_outstanding(Arc::clone(&self.state.outstanding))
                    .load(stream, class_ready, inplace);
                log::debug!(
                    "Object stream job {} loaded {} root(s) with {} error(s)",
                    self.handle.0,
                    outcome.roots_loaded,
                    outcome.errors
                );
                outcome.success
            }
            JobMode::Save { .. } => {
                log::error!("Object stream job {} is a save job", self.handle.0);
                false
            }
        };
        self.complete(success)
    }

    /// Run a save job on the calling thread.
    ///
    /// `write` submits roots through the [`WriteSession`]; the session
    /// cannot outlive the call. The job succeeds if every submitted root was
    /// written and the stream was finalized.
    pub fn run_save<F>(self, stream: &mut dyn ByteStream, registry: &TypeRegistry, write: F) -> bool
    where
        F: FnOnce(&mut WriteSession<'_, '_>),
    {
        let success = match &self.mode {
            JobMode::Save { format } => {
                let config = ObjectStreamConfig {
                    format: *format,
                    ..self.config.clone()
                };
                let mut writer = ObjectStreamWriter::create_with_config(stream, registry, &config)
                    .with_cancellation(self.state.token.clone());
                let mut session = WriteSession {
                    writer: &mut writer,
                    ok: true,
                };
                write(&mut session);
                let written = session.ok;
                let finalized = writer.finalize();
                written && finalized && !self.state.token.is_cancelled()
            }
            JobMode::Load { .. } => {
                log::error!("Object stream job {} is a load job", self.handle.0);
                false
            }
        };
        self.complete(success)
    }

    /// Run a load job on a new thread.
    ///
    /// If the thread cannot be started the job is dropped, which fires its
    /// completion with `false`.
    pub fn spawn_load<F>(
        self,
        mut stream: Box<dyn ByteStream>,
        registry: Arc<TypeRegistry>,
        class_ready: F,
    ) -> std::io::Result<JoinHandle<bool>>
    where
        F: FnMut(LoadedRoot, Uuid, &TypeRegistry) + Send + 'static,
    {
        thread::Builder::new()
            .name(format!("object-stream-load-{}", self.handle.0))
            .spawn(move || self.run_load(stream.as_mut(), &registry, class_ready, None))
    }

    /// Run a save job on a new thread, the saving thread `write` runs on.
    pub fn spawn_save<F>(
        self,
        mut stream: Box<dyn ByteStream>,
        registry: Arc<TypeRegistry>,
        write: F,
    ) -> std::io::Result<JoinHandle<bool>>
    where
        F: FnOnce(&mut WriteSession<'_, '_>) + Send + 'static,
    {
        thread::Builder::new()
            .name(format!("object-stream-save-{}", self.handle.0))
            .spawn(move || self.run_save(stream.as_mut(), &registry, write))
    }

    fn complete(mut self, success: bool) -> bool {
        unregister(self.handle);
        if let Some(completion) = self.completion.take() {
            completion(self.handle, success);
        }
        success
    }
}

impl Drop for ObjectStreamJob {
    fn drop(&mut self) {
        if let Some(completion) = self.completion.take() {
            log::warn!("Object stream job {} dropped before running", self.handle.0);
            unregister(self.handle);
            completion(self.handle, false);
        }
    }
}

/// Write access to a save job's stream for the duration of its callback.
pub struct WriteSession<'s, 'w> {
    writer: &'s mut ObjectStreamWriter<'w>,
    ok: bool,
}

impl WriteSession<'_, '_> {
    pub fn write_class(
        &mut self,
        object: &dyn Reflect,
        type_uuid: Uuid,
        descriptor: Option<&ClassDescriptor>,
    ) -> bool {
        let written = self.writer.write_class(object, type_uuid, descriptor);
        self.ok &= written;
        written
    }

    pub fn write_object<T: Reflect>(&mut self, object: &T) -> bool {
        let written = self.writer.write_object(object);
        self.ok &= written;
        written
    }

    pub fn roots_written(&self) -> usize {
        self.writer.roots_written()
    }
}

/// Entry points of the object stream subsystem.
pub struct ObjectStream;

impl ObjectStream {
    /// See [`ObjectStreamWriter::create`].
    pub fn create<'a>(
        stream: &'a mut dyn ByteStream,
        registry: &'a TypeRegistry,
        format: StreamFormat,
    ) -> ObjectStreamWriter<'a> {
        ObjectStreamWriter::create(stream, registry, format)
    }

    /// See [`reader::load_blocking`].
    pub fn load_blocking<F>(
        stream: &mut dyn ByteStream,
        registry: &TypeRegistry,
        class_ready: F,
        filter: &FilterDescriptor,
        inplace: Option<&mut dyn InplaceRootProvider>,
    ) -> bool
    where
        F: FnMut(LoadedRoot, Uuid, &TypeRegistry),
    {
        reader::load_blocking(stream, registry, class_ready, filter, inplace)
    }

    /// Request cancellation of a running job. Returns `false` if the job
    /// no longer exists.
    pub fn cancel(handle: JobHandle) -> bool {
        handle.cancel()
    }
}
