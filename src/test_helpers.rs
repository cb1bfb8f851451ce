//! Shared test utilities for the thumbcache test suite.
//!
//! Provides synthetic image fixtures and scripted collaborators for the
//! service. Collaborators record calls behind `Mutex` (not `RefCell`) so they
//! are `Sync` and can be shared across threads.
//!
//! # Usage
//!
//! ```ignore
//! use crate::test_helpers::*;
//!
//! let store = Arc::new(ScriptedStore::new(vec![None, Some(b"thumb".to_vec())], false));
//! let locker = Arc::new(ScriptedLocker::new(vec![Err(())]));
//! // ... build a Service, run it, then inspect:
//! assert_eq!(store.get_calls().len(), 2);
//! assert_eq!(locker.events(), vec![LockEvent::Lock("key".into())]);
//! ```

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use image::{DynamicImage, ImageFormat, RgbImage, RgbaImage};

use crate::error::{ErrorKind, ThumbnailError};
use crate::service::{Downloader, Lock, LockError, Locker, Store, StoreError, Transformation};

// =========================================================================
// Image fixtures
// =========================================================================

fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    })
}

fn encode(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, format).unwrap();
    buf.into_inner()
}

/// A gradient JPEG at the encoder's default quality.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(DynamicImage::ImageRgb8(gradient(width, height)), ImageFormat::Jpeg)
}

/// A single-color JPEG, for asserting where padding lands.
pub fn solid_jpeg_bytes(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, image::Rgb(rgb));
    encode(DynamicImage::ImageRgb8(img), ImageFormat::Jpeg)
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(DynamicImage::ImageRgb8(gradient(width, height)), ImageFormat::Png)
}

pub fn gif_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, image::Rgba([200, 40, 40, 255]));
    encode(DynamicImage::ImageRgba8(img), ImageFormat::Gif)
}

// =========================================================================
// Downloader
// =========================================================================

/// Returns the same bytes (or error kind) for every locator.
pub struct StaticDownloader {
    result: Result<Vec<u8>, ErrorKind>,
    pub calls: Mutex<Vec<String>>,
}

impl StaticDownloader {
    pub fn new(result: Result<Vec<u8>, ErrorKind>) -> Self {
        Self {
            result,
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl Downloader for StaticDownloader {
    fn download(&self, locator: &str) -> Result<Vec<u8>, ThumbnailError> {
        self.calls.lock().unwrap().push(locator.to_string());
        self.result.clone().map_err(ThumbnailError::new)
    }
}

// =========================================================================
// Store
// =========================================================================

/// Answers `get` from a script (then `None` once exhausted) and records `set`.
pub struct ScriptedStore {
    gets: Mutex<VecDeque<Option<Vec<u8>>>>,
    get_calls: Mutex<Vec<String>>,
    sets: Mutex<Vec<(String, Vec<u8>)>>,
    set_fails: bool,
}

impl ScriptedStore {
    pub fn new(gets: Vec<Option<Vec<u8>>>, set_fails: bool) -> Self {
        Self {
            gets: Mutex::new(gets.into()),
            get_calls: Mutex::new(Vec::new()),
            sets: Mutex::new(Vec::new()),
            set_fails,
        }
    }

    pub fn get_calls(&self) -> Vec<String> {
        self.get_calls.lock().unwrap().clone()
    }

    pub fn sets(&self) -> Vec<(String, Vec<u8>)> {
        self.sets.lock().unwrap().clone()
    }
}

impl Store for ScriptedStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.get_calls.lock().unwrap().push(key.to_string());
        self.gets.lock().unwrap().pop_front().flatten()
    }

    fn set(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        self.sets
            .lock()
            .unwrap()
            .push((key.to_string(), data.to_vec()));
        if self.set_fails {
            Err(StoreError::Backend("oups".into()))
        } else {
            Ok(())
        }
    }
}

// =========================================================================
// Locker
// =========================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockEvent {
    Lock(String),
    Unlock,
    Extend,
}

/// A lock whose `lock()` outcome is fixed up front. Records every call.
pub struct RecordingLock {
    name: String,
    result: Result<(), ()>,
    events: Arc<Mutex<Vec<LockEvent>>>,
}

impl RecordingLock {
    pub fn new(result: Result<(), ()>, events: Arc<Mutex<Vec<LockEvent>>>) -> Self {
        Self::named("lock", result, events)
    }

    pub fn named(name: &str, result: Result<(), ()>, events: Arc<Mutex<Vec<LockEvent>>>) -> Self {
        Self {
            name: name.to_string(),
            result,
            events,
        }
    }
}

impl Lock for RecordingLock {
    fn lock(&mut self) -> Result<(), LockError> {
        self.events
            .lock()
            .unwrap()
            .push(LockEvent::Lock(self.name.clone()));
        self.result.map_err(|_| LockError::Held(self.name.clone()))
    }

    fn unlock(&mut self) -> bool {
        self.events.lock().unwrap().push(LockEvent::Unlock);
        true
    }

    fn extend(&mut self) -> bool {
        self.events.lock().unwrap().push(LockEvent::Extend);
        true
    }
}

/// Hands out [`RecordingLock`]s whose acquire results follow a script.
/// Once the script is exhausted every lock fails to acquire.
pub struct ScriptedLocker {
    results: Mutex<VecDeque<Result<(), ()>>>,
    events: Arc<Mutex<Vec<LockEvent>>>,
}

impl ScriptedLocker {
    pub fn new(results: Vec<Result<(), ()>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn events(&self) -> Vec<LockEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Locker for ScriptedLocker {
    fn new_lock(&self, name: &str) -> Box<dyn Lock> {
        let result = self.results.lock().unwrap().pop_front().unwrap_or(Err(()));
        Box::new(RecordingLock::named(name, result, Arc::clone(&self.events)))
    }
}

// =========================================================================
// Transformation
// =========================================================================

enum Behavior {
    Return(Result<Vec<u8>, ErrorKind>),
    Panic,
}

/// Fixed fingerprint, fixed result; records the inputs it was given.
pub struct FakeTransformation {
    fingerprint: String,
    behavior: Behavior,
    inputs: Mutex<Vec<Vec<u8>>>,
}

impl FakeTransformation {
    pub fn new(fingerprint: &str, result: Result<Vec<u8>, ErrorKind>) -> Self {
        Self {
            fingerprint: fingerprint.to_string(),
            behavior: Behavior::Return(result),
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn panicking(fingerprint: &str) -> Self {
        Self {
            fingerprint: fingerprint.to_string(),
            behavior: Behavior::Panic,
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.inputs.lock().unwrap().len()
    }

    pub fn inputs(&self) -> Vec<Vec<u8>> {
        self.inputs.lock().unwrap().clone()
    }
}

impl Transformation for FakeTransformation {
    fn fingerprint(&self, _data: &[u8]) -> String {
        self.fingerprint.clone()
    }

    fn perform(&self, data: &[u8]) -> Result<Vec<u8>, ThumbnailError> {
        self.inputs.lock().unwrap().push(data.to_vec());
        match &self.behavior {
            Behavior::Return(result) => result.clone().map_err(ThumbnailError::new),
            Behavior::Panic => panic!("transformation panicked"),
        }
    }
}
