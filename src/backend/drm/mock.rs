//! In-memory kernel used by the unit tests

use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use drm::buffer;
use drm::control::{framebuffer, plane, PlaneType, RawResourceHandle};
use drm_fourcc::{DrmFourcc, DrmModifier};

use super::buffer::{BufferInfo, BufferInfoError, BufferInfoGetter, BufferPlane};
use super::commit::{AtomicCommitArgs, AtomicStateManager, CommitError};
use super::error::AccessError;
use super::kms::{FramebufferDescriptor, KmsDevice};
use super::pipeline::PipelineInfo;
use super::resources::{ConnectorInfo, DeviceResources, EncoderInfo, PlaneInfo};

/// Build any resource handle from a raw, non-zero id
pub(crate) fn handle<H: From<RawResourceHandle>>(id: u32) -> H {
    drm::control::from_u32(id).expect("handle ids are non-zero")
}

fn plane_info(id: u32, kind: PlaneType, crtcs: &[u32]) -> PlaneInfo {
    PlaneInfo {
        handle: handle(id),
        kind,
        possible_crtcs: crtcs.iter().map(|c| handle(*c)).collect(),
    }
}

/// Connector 1, encoder 10, crtc 20, primary plane 30 and overlays 31, 32, ...
pub(crate) fn single_output_resources(overlays: u32) -> DeviceResources {
    let mut planes = vec![plane_info(30, PlaneType::Primary, &[20])];
    planes.extend((0..overlays).map(|i| plane_info(31 + i, PlaneType::Overlay, &[20])));
    DeviceResources {
        connectors: vec![ConnectorInfo {
            handle: handle(1),
            name: String::from("HDMIA-1"),
            current_encoder: None,
            encoders: vec![handle(10)],
        }],
        encoders: vec![EncoderInfo {
            handle: handle(10),
            current_crtc: None,
            possible_crtcs: vec![handle(20)],
        }],
        crtcs: vec![handle(20)],
        planes,
    }
}

/// Connectors 1 and 2, encoders 10 and 11, crtcs 20 and 21, all freely combinable
///
/// Crtc 20 has primary plane 30, overlay 31 and cursor 35, crtc 21 has primary plane 40.
/// Overlay 32 works with both crtcs.
pub(crate) fn dual_output_resources() -> DeviceResources {
    let connector = |id: u32, name: &str| ConnectorInfo {
        handle: handle(id),
        name: name.to_string(),
        current_encoder: None,
        encoders: vec![handle(10), handle(11)],
    };
    let encoder = |id: u32| EncoderInfo {
        handle: handle(id),
        current_crtc: None,
        possible_crtcs: vec![handle(20), handle(21)],
    };
    DeviceResources {
        connectors: vec![connector(1, "eDP-1"), connector(2, "DP-1")],
        encoders: vec![encoder(10), encoder(11)],
        crtcs: vec![handle(20), handle(21)],
        planes: vec![
            plane_info(30, PlaneType::Primary, &[20]),
            plane_info(31, PlaneType::Overlay, &[20]),
            plane_info(32, PlaneType::Overlay, &[20, 21]),
            plane_info(35, PlaneType::Cursor, &[20]),
            plane_info(40, PlaneType::Primary, &[21]),
        ],
    }
}

fn rejected(errmsg: &'static str) -> AccessError {
    AccessError {
        errmsg,
        dev: None,
        source: io::Error::new(io::ErrorKind::InvalidInput, "rejected by mock"),
    }
}

#[derive(Debug, Default)]
struct MockState {
    failing_fds: Vec<RawFd>,
    fail_add: bool,
    next_fb: u32,
    added: Vec<FramebufferDescriptor>,
    removed: Vec<framebuffer::Handle>,
    closed: Vec<buffer::Handle>,
}

/// Kernel double recording framebuffer registrations
///
/// Importing fd `n` always yields GEM handle `1000 + n`.
#[derive(Debug, Default)]
pub(crate) struct MockDevice {
    modifiers: bool,
    state: Mutex<MockState>,
}

impl MockDevice {
    pub(crate) fn with_modifiers() -> Self {
        MockDevice {
            modifiers: true,
            ..MockDevice::default()
        }
    }

    pub(crate) fn fail_fd(&self, fd: RawFd) {
        self.state.lock().unwrap().failing_fds.push(fd);
    }

    pub(crate) fn fail_add_framebuffer(&self, fail: bool) {
        self.state.lock().unwrap().fail_add = fail;
    }

    pub(crate) fn added(&self) -> Vec<FramebufferDescriptor> {
        self.state.lock().unwrap().added.clone()
    }

    pub(crate) fn removed(&self) -> Vec<framebuffer::Handle> {
        self.state.lock().unwrap().removed.clone()
    }

    pub(crate) fn closed(&self) -> Vec<buffer::Handle> {
        self.state.lock().unwrap().closed.clone()
    }
}

impl KmsDevice for MockDevice {
    fn prime_fd_to_handle(&self, fd: RawFd) -> Result<buffer::Handle, AccessError> {
        if self.state.lock().unwrap().failing_fds.contains(&fd) {
            return Err(rejected("Failed to import prime fd"));
        }
        Ok(handle(1000 + fd as u32))
    }

    fn close_handle(&self, handle: buffer::Handle) -> Result<(), AccessError> {
        self.state.lock().unwrap().closed.push(handle);
        Ok(())
    }

    fn add_framebuffer(&self, desc: &FramebufferDescriptor) -> Result<framebuffer::Handle, AccessError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_add {
            return Err(rejected("Failed to add framebuffer"));
        }
        state.next_fb += 1;
        state.added.push(desc.clone());
        Ok(handle(500 + state.next_fb))
    }

    fn remove_framebuffer(&self, fb: framebuffer::Handle) -> Result<(), AccessError> {
        self.state.lock().unwrap().removed.push(fb);
        Ok(())
    }

    fn has_addfb2_modifiers(&self) -> bool {
        self.modifiers
    }
}

/// Resolves any non-negative fd to a linear 256x256 ARGB buffer
#[derive(Debug)]
pub(crate) struct MockBuffers;

impl BufferInfoGetter<RawFd> for MockBuffers {
    fn buffer_info(&self, fd: &RawFd) -> Result<BufferInfo, BufferInfoError> {
        if *fd < 0 {
            return Err(BufferInfoError::Query(format!("invalid fd {}", fd)));
        }
        Ok(BufferInfo::single_plane(
            256,
            256,
            DrmFourcc::Argb8888,
            BufferPlane {
                prime_fd: *fd,
                pitch: 1024,
                offset: 0,
                modifier: DrmModifier::Linear,
            },
        ))
    }
}

/// Buffers wider than any display coordinate
#[derive(Debug)]
pub(crate) struct OversizedBuffers;

impl BufferInfoGetter<RawFd> for OversizedBuffers {
    fn buffer_info(&self, fd: &RawFd) -> Result<BufferInfo, BufferInfoError> {
        Ok(BufferInfo::single_plane(
            u32::MAX,
            16,
            DrmFourcc::Argb8888,
            BufferPlane {
                prime_fd: *fd,
                pitch: 64,
                offset: 0,
                modifier: DrmModifier::Linear,
            },
        ))
    }
}

/// A commit as seen by the [`MockCommitter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CommitRecord {
    pub test_only: bool,
    pub planes: Vec<plane::Handle>,
    pub framebuffers: Vec<framebuffer::Handle>,
}

/// Shared state of all committers created by one [`committer_factory`]
#[derive(Debug, Default)]
pub(crate) struct CommitLog {
    pub fail_tests: AtomicBool,
    pub fail_commits: AtomicBool,
    created: AtomicUsize,
    stopped: AtomicUsize,
    commits: Mutex<Vec<CommitRecord>>,
}

impl CommitLog {
    pub(crate) fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub(crate) fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }

    pub(crate) fn commits(&self) -> Vec<CommitRecord> {
        self.commits.lock().unwrap().clone()
    }
}

#[derive(Debug)]
pub(crate) struct MockCommitter {
    log: Arc<CommitLog>,
}

impl AtomicStateManager for MockCommitter {
    fn commit(&mut self, args: &AtomicCommitArgs<'_>) -> Result<(), CommitError> {
        self.log.commits.lock().unwrap().push(CommitRecord {
            test_only: args.test_only,
            planes: args.plan.iter().map(|layer| layer.plane).collect(),
            framebuffers: args
                .plan
                .iter()
                .map(|layer| layer.framebuffer.fb())
                .collect(),
        });
        if args.test_only && self.log.fail_tests.load(Ordering::SeqCst) {
            return Err(CommitError::TestFailed);
        }
        if !args.test_only && self.log.fail_commits.load(Ordering::SeqCst) {
            return Err(CommitError::Access(rejected("Atomic commit failed")));
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.log.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) fn committer_factory(
    log: &Arc<CommitLog>,
) -> impl Fn(&PipelineInfo) -> Box<dyn AtomicStateManager> {
    let log = log.clone();
    move |_pipeline: &PipelineInfo| -> Box<dyn AtomicStateManager> {
        log.created.fetch_add(1, Ordering::SeqCst);
        Box::new(MockCommitter { log: log.clone() })
    }
}
