//! Request/response correlation on top of the unreliable channel.
//!
//! UDP gives no delivery guarantee, so a request expecting exactly one response
//!  (e.g. the NAT identification handshake) has to resend until the response shows
//!  up or a retry budget is exhausted. [MessageAckHelper] holds that state for one
//!  in-flight request. It owns no task and no timer: the caller invokes [MessageAckHelper::update]
//!  from its own tick loop and hands every inbound frame to [MessageAckHelper::route],
//!  which consumes the awaited response and forwards everything else to the fallback
//!  [MessageRouter], so interposing a helper is invisible to unrelated traffic.

use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::NetConfig;
use crate::message::{encode_frame, MessageContainer, TypedMessage};

/// the transmit seam: anything that can fire a pre-encoded frame at an endpoint
#[cfg_attr(test, automock)]
pub trait AckSender: Send + Sync {
    fn send_frame(&self, to: SocketAddr, frame: Bytes) -> anyhow::Result<()>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait AckListener<In: TypedMessage + Sync>: Send + Sync {
    async fn on_response(&self, from: SocketAddr, response: In);

    /// called once when the retry budget is exhausted without a response
    async fn on_failure(&self, to: SocketAddr);
}

/// Where frames go when the helper does not consume them: the application's regular
///  message dispatch.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MessageRouter: Send + Sync {
    async fn route(&self, from: SocketAddr, container: MessageContainer);
}

enum AckState {
    Idle,
    AwaitingResponse {
        target: SocketAddr,
        frame: Bytes,
        last_send: Instant,
        /// sends so far, the initial transmission included
        attempts: u32,
    },
}

pub struct MessageAckHelper<Out: TypedMessage, In: TypedMessage + Sync> {
    sender: Arc<dyn AckSender>,
    listener: Arc<dyn AckListener<In>>,
    fallback: Arc<dyn MessageRouter>,
    max_retries: u32,
    retry_interval: Duration,
    append_checksum: bool,
    state: AckState,
    _out: PhantomData<fn(Out)>,
}

impl<Out: TypedMessage, In: TypedMessage + Sync> MessageAckHelper<Out, In> {
    pub fn new(
        sender: Arc<dyn AckSender>,
        listener: Arc<dyn AckListener<In>>,
        fallback: Arc<dyn MessageRouter>,
        config: &NetConfig,
    ) -> MessageAckHelper<Out, In> {
        MessageAckHelper {
            sender,
            listener,
            fallback,
            max_retries: config.ack_max_retries,
            retry_interval: config.ack_retry_interval,
            append_checksum: config.append_checksum,
            state: AckState::Idle,
            _out: PhantomData,
        }
    }

    pub fn is_awaiting(&self) -> bool {
        matches!(self.state, AckState::AwaitingResponse { .. })
    }

    /// Encodes the request once, sends it, and arms the retry cycle. At most one
    ///  request can be in flight per helper.
    pub fn start(&mut self, request: &Out, to: SocketAddr) -> anyhow::Result<()> {
        if self.is_awaiting() {
            bail!("a request is already awaiting its response");
        }

        let frame = encode_frame(request, self.append_checksum);
        self.sender.send_frame(to, frame.clone())?;
        debug!("sent request to {:?}, awaiting response", to);
        self.state = AckState::AwaitingResponse {
            target: to,
            frame,
            last_send: Instant::now(),
            attempts: 1,
        };
        Ok(())
    }

    /// One retry tick: resends when the interval since the last send elapsed, and
    ///  gives up once the initial send plus `max_retries` resends went unanswered.
    pub async fn update(&mut self) {
        let AckState::AwaitingResponse {
            target,
            frame,
            last_send,
            attempts,
        } = &mut self.state
        else {
            return;
        };

        if last_send.elapsed() < self.retry_interval {
            return;
        }

        if *attempts > self.max_retries {
            let to = *target;
            self.state = AckState::Idle;
            warn!("request to {:?} went unanswered - giving up", to);
            self.listener.on_failure(to).await;
            return;
        }

        debug!(
            "no response from {:?} after {:?} - resending (attempt {})",
            target,
            self.retry_interval,
            *attempts + 1
        );
        if let Err(e) = self.sender.send_frame(*target, frame.clone()) {
            warn!("resend to {:?} failed: {}", target, e);
        }
        *attempts += 1;
        *last_send = Instant::now();
    }

    /// Hands an inbound frame to the helper. The awaited response is consumed and
    ///  reported to the listener; every other frame goes to the fallback router
    ///  unchanged.
    pub async fn route(&mut self, from: SocketAddr, container: MessageContainer) {
        if !self.is_awaited_response(from, &container) {
            self.fallback.route(from, container).await;
            return;
        }

        match container.parse::<In>() {
            Ok(response) => {
                self.state = AckState::Idle;
                debug!("response from {:?} arrived", from);
                self.listener.on_response(from, response).await;
            }
            Err(e) => {
                warn!(
                    "frame from {:?} has the awaited type tag but failed to decode: {} - passing it on",
                    from, e
                );
                self.fallback.route(from, container).await;
            }
        }
    }

    fn is_awaited_response(&self, from: SocketAddr, container: &MessageContainer) -> bool {
        match &self.state {
            AckState::AwaitingResponse { target, .. } => from == *target && container.is::<In>(),
            AckState::Idle => false,
        }
    }
}
