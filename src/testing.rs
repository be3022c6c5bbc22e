//! Test doubles for the device, recognizer, backend and playback seams

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::backend::{Backend, ChatReply, ConversationContext, QueryResult};
use crate::capture::{samples_to_wav, AudioBlob, InputTrack, Microphone, SAMPLE_RATE};
use crate::error::{Result, VoiceError};
use crate::playback::{AudioOutput, FallbackPlayer, OutputState};
use crate::recognition::{RecognitionEvent, SpeechRecognizer};

pub fn blob() -> AudioBlob {
    AudioBlob {
        bytes: b"query".to_vec(),
        mime_type: "audio/wav".to_string(),
    }
}

/// Short voiced WAV clip
pub fn tone_wav() -> Vec<u8> {
    let samples: Vec<f32> = (0..800).map(|i| 0.4 * (i as f32 * 0.05).sin()).collect();
    samples_to_wav(&samples, SAMPLE_RATE).unwrap()
}

type OpenHook = Box<dyn Fn() + Send + Sync>;

/// Microphone that hands out tracks pre-filled with chunks
pub struct FakeMicrophone {
    chunks: Vec<Vec<u8>>,
    denied: bool,
    failing_drain: bool,
    opens: AtomicUsize,
    open_tracks: Arc<AtomicUsize>,
    on_open: Mutex<Option<OpenHook>>,
}

impl FakeMicrophone {
    pub fn with_chunks(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks,
            denied: false,
            failing_drain: false,
            opens: AtomicUsize::new(0),
            open_tracks: Arc::new(AtomicUsize::new(0)),
            on_open: Mutex::new(None),
        }
    }

    pub fn denied() -> Self {
        Self {
            denied: true,
            ..Self::with_chunks(vec![])
        }
    }

    pub fn failing_drain(mut self) -> Self {
        self.failing_drain = true;
        self
    }

    /// Run `hook` on every open, before access is granted
    pub fn on_open(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_open.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Tracks opened and not yet released
    pub fn open_tracks(&self) -> usize {
        self.open_tracks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Microphone for FakeMicrophone {
    async fn open(&self) -> Result<Box<dyn InputTrack>> {
        if let Some(hook) = self.on_open.lock().unwrap().as_ref() {
            hook();
        }
        self.opens.fetch_add(1, Ordering::SeqCst);

        if self.denied {
            return Err(VoiceError::PermissionDenied("denied by test".to_string()));
        }

        self.open_tracks.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeTrack {
            chunks: self.chunks.clone(),
            failing_drain: self.failing_drain,
            released: false,
            open_tracks: Arc::clone(&self.open_tracks),
        }))
    }
}

struct FakeTrack {
    chunks: Vec<Vec<u8>>,
    failing_drain: bool,
    released: bool,
    open_tracks: Arc<AtomicUsize>,
}

impl InputTrack for FakeTrack {
    fn mime_type(&self) -> &str {
        "audio/wav"
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.open_tracks.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn take_chunks(&mut self) -> Result<Vec<Vec<u8>>> {
        if self.failing_drain {
            return Err(VoiceError::Io(std::io::Error::other("wav encoder failed")));
        }
        Ok(std::mem::take(&mut self.chunks))
    }
}

#[derive(Default)]
struct RecognizerState {
    starts: usize,
    stops: usize,
    running: bool,
    fail_next_start: bool,
    sender: Option<mpsc::Sender<RecognitionEvent>>,
    on_start: Vec<RecognitionEvent>,
}

/// Recognizer driven by the test; clones share state
#[derive(Clone, Default)]
pub struct FakeRecognizer {
    state: Arc<Mutex<RecognizerState>>,
}

impl FakeRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starts(&self) -> usize {
        self.state.lock().unwrap().starts
    }

    pub fn stops(&self) -> usize {
        self.state.lock().unwrap().stops
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().running
    }

    pub fn fail_next_start(&self) {
        self.state.lock().unwrap().fail_next_start = true;
    }

    /// Deliver `event` on the current session
    pub fn emit(&self, event: RecognitionEvent) {
        let state = self.state.lock().unwrap();
        let sender = state.sender.as_ref().expect("no recognition session");
        sender.try_send(event).unwrap();
    }

    /// Close the current session without an `Ended` event
    pub fn drop_sender(&self) {
        self.state.lock().unwrap().sender = None;
    }

    /// Deliver `event` as soon as the next session starts
    pub fn queue_on_start(&self, event: RecognitionEvent) {
        self.state.lock().unwrap().on_start.push(event);
    }
}

impl SpeechRecognizer for FakeRecognizer {
    fn start(&mut self, events: mpsc::Sender<RecognitionEvent>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_next_start {
            state.fail_next_start = false;
            return Err(VoiceError::RecognitionFault("start-refused".to_string()));
        }

        for event in state.on_start.drain(..) {
            events.try_send(event).unwrap();
        }
        state.starts += 1;
        state.running = true;
        state.sender = Some(events);
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.stops += 1;
        state.running = false;
        state.sender = None;
    }
}

/// Scripted backend; each call pops the next scripted result
#[derive(Default)]
pub struct FakeBackend {
    transcripts: Mutex<VecDeque<std::result::Result<String, u16>>>,
    replies: Mutex<VecDeque<std::result::Result<ChatReply, u16>>>,
    audio: Vec<u8>,
    transcribe_calls: AtomicUsize,
    chat_calls: Mutex<Vec<(String, ConversationContext)>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transcript(self, text: &str) -> Self {
        self.transcripts.lock().unwrap().push_back(Ok(text.to_string()));
        self
    }

    pub fn transcribe_status(self, status: u16) -> Self {
        self.transcripts.lock().unwrap().push_back(Err(status));
        self
    }

    pub fn reply(self, reply: ChatReply) -> Self {
        self.replies.lock().unwrap().push_back(Ok(reply));
        self
    }

    pub fn chat_status(self, status: u16) -> Self {
        self.replies.lock().unwrap().push_back(Err(status));
        self
    }

    pub fn audio(mut self, bytes: Vec<u8>) -> Self {
        self.audio = bytes;
        self
    }

    pub fn transcribe_calls(&self) -> usize {
        self.transcribe_calls.load(Ordering::SeqCst)
    }

    pub fn chat_calls(&self) -> Vec<(String, ConversationContext)> {
        self.chat_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn transcribe(&self, _audio: AudioBlob) -> Result<QueryResult> {
        self.transcribe_calls.fetch_add(1, Ordering::SeqCst);
        match self.transcripts.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(QueryResult { text }),
            Some(Err(status)) => Err(VoiceError::TranscriptionFailed(status)),
            None => Ok(QueryResult {
                text: String::new(),
            }),
        }
    }

    async fn chat(&self, query: &str, context: &ConversationContext) -> Result<ChatReply> {
        self.chat_calls
            .lock()
            .unwrap()
            .push((query.to_string(), context.clone()));
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(status)) => Err(VoiceError::ChatFailed(status)),
            None => Err(VoiceError::ChatFailed(503)),
        }
    }

    async fn fetch_audio(&self, _audio_url: &str) -> Result<Vec<u8>> {
        Ok(self.audio.clone())
    }
}

/// Output that records resumes and renders instead of playing
pub struct FakeOutput {
    running: Mutex<bool>,
    resumes: AtomicUsize,
    renders: AtomicUsize,
}

impl FakeOutput {
    pub fn new() -> Self {
        Self {
            running: Mutex::new(false),
            resumes: AtomicUsize::new(0),
            renders: AtomicUsize::new(0),
        }
    }

    pub fn resumes(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }

    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioOutput for FakeOutput {
    fn state(&self) -> OutputState {
        if *self.running.lock().unwrap() {
            OutputState::Running
        } else {
            OutputState::Suspended
        }
    }

    async fn resume(&self) -> Result<()> {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        *self.running.lock().unwrap() = true;
        Ok(())
    }

    async fn render(&self, _frames: Vec<[f32; 2]>, _sample_rate: u32) -> Result<()> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        *self.running.lock().unwrap() = false;
        Ok(())
    }
}

/// Plain player that records the URLs it was given
pub struct FakeFallback {
    fail: bool,
    calls: Mutex<Vec<String>>,
}

impl FakeFallback {
    pub fn new() -> Self {
        Self {
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FallbackPlayer for FakeFallback {
    async fn play(&self, audio_url: &str) -> Result<()> {
        self.calls.lock().unwrap().push(audio_url.to_string());
        if self.fail {
            return Err(VoiceError::PlaybackBlocked {
                url: audio_url.to_string(),
            });
        }
        Ok(())
    }
}
