//! Outbound producers
//!
//! A response body can be fed to a stream by a producer instead of being
//! written in one go. Push producers are paused and resumed as the stream's
//! flow-control window closes and opens. Pull producers are asked for one
//! more piece at a time; the stream drives them through [`PullToPush`].

use super::stream::StreamIo;

/// Producer that writes until told to pause
pub trait PushProducer {
    /// Stop writing until `resume_producing` is called
    fn pause_producing(&mut self);

    /// Continue writing to the stream
    fn resume_producing(&mut self, io: &mut StreamIo<'_>);

    /// Stop for good; the stream is going away
    fn stop_producing(&mut self);
}

/// Producer that writes one piece each time it is asked
pub trait PullProducer {
    /// Write the next piece to the stream
    fn resume_producing(&mut self, io: &mut StreamIo<'_>);

    /// Stop for good; the stream is going away
    fn stop_producing(&mut self);
}

/// A producer handed to [`StreamIo::register_producer`]
pub enum Producer {
    /// Streaming producer
    Push(Box<dyn PushProducer>),
    /// Non-streaming producer, adapted with [`PullToPush`]
    Pull(Box<dyn PullProducer>),
}

impl Producer {
    /// Whether this is a streaming producer
    pub fn is_streaming(&self) -> bool {
        matches!(self, Producer::Push(_))
    }
}

/// Drives a pull producer through the push contract
///
/// While streaming and not paused, each [`pull`](PullToPush::pull) asks the
/// wrapped producer for one more piece. The stream calls `pull` from a
/// recurring reactor task.
pub struct PullToPush {
    producer: Box<dyn PullProducer>,
    streaming: bool,
    paused: bool,
}

impl PullToPush {
    pub fn new(producer: Box<dyn PullProducer>) -> Self {
        PullToPush {
            producer,
            streaming: false,
            paused: false,
        }
    }

    pub fn start_streaming(&mut self) {
        self.streaming = true;
        self.paused = false;
    }

    pub fn stop_streaming(&mut self) {
        self.streaming = false;
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Ask the wrapped producer for one piece, unless paused or stopped
    pub fn pull(&mut self, io: &mut StreamIo<'_>) {
        if self.streaming && !self.paused {
            self.producer.resume_producing(io);
        }
    }
}

impl PushProducer for PullToPush {
    fn pause_producing(&mut self) {
        self.paused = true;
    }

    fn resume_producing(&mut self, _io: &mut StreamIo<'_>) {
        self.paused = false;
    }

    fn stop_producing(&mut self) {
        self.stop_streaming();
        self.producer.stop_producing();
    }
}

/// The producer a stream holds once registration succeeded
pub(crate) enum RegisteredProducer {
    Push(Box<dyn PushProducer>),
    Adapted(PullToPush),
}

impl RegisteredProducer {
    pub(crate) fn from_producer(producer: Producer) -> Self {
        match producer {
            Producer::Push(push) => RegisteredProducer::Push(push),
            Producer::Pull(pull) => {
                let mut adapter = PullToPush::new(pull);
                adapter.start_streaming();
                RegisteredProducer::Adapted(adapter)
            }
        }
    }

    pub(crate) fn pause_producing(&mut self) {
        match self {
            RegisteredProducer::Push(producer) => producer.pause_producing(),
            RegisteredProducer::Adapted(adapter) => adapter.pause_producing(),
        }
    }

    pub(crate) fn resume_producing(&mut self, io: &mut StreamIo<'_>) {
        match self {
            RegisteredProducer::Push(producer) => producer.resume_producing(io),
            RegisteredProducer::Adapted(adapter) => adapter.resume_producing(io),
        }
    }

    pub(crate) fn stop_producing(&mut self) {
        match self {
            RegisteredProducer::Push(producer) => producer.stop_producing(),
            RegisteredProducer::Adapted(adapter) => adapter.stop_producing(),
        }
    }

    pub(crate) fn stop_streaming(&mut self) {
        if let RegisteredProducer::Adapted(adapter) = self {
            adapter.stop_streaming();
        }
    }
}
