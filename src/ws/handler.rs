//! Callback surface for the streaming session.

use serde_json::Value;

use crate::error::SdkError;
use crate::ws::StreamHandle;

/// Named session callbacks. Every method defaults to a no-op.
///
/// All callbacks run on the session's event-loop thread, one at a time and
/// in frame arrival order. The [`StreamHandle`] argument can be used to
/// subscribe, unsubscribe or close from inside a callback.
///
/// ```rust,ignore
/// struct Printer;
///
/// impl StreamHandler for Printer {
///     fn on_login(&mut self, stream: &StreamHandle) {
///         let key = SubscriptionKey::new(Exchange::Nse, "11536");
///         stream.subscribe(SubscriptionKind::Tick, &[key]).ok();
///     }
///
///     fn on_tick_update(&mut self, _stream: &StreamHandle, tick: &Value) {
///         println!("{tick}");
///     }
/// }
/// ```
#[allow(unused_variables)]
pub trait StreamHandler: Send {
    /// Transport is up; the login frame has already been sent.
    fn on_connect(&mut self, stream: &StreamHandle) {}

    /// Session is logged in and the registry has been replayed.
    fn on_open(&mut self, stream: &StreamHandle) {}

    /// Login acknowledged. Subscribe here.
    fn on_login(&mut self, stream: &StreamHandle) {}

    fn on_close(&mut self, stream: &StreamHandle, code: u16, reason: &str) {}

    /// Abnormal close or failed connection attempt.
    fn on_error(&mut self, stream: &StreamHandle, code: u16, reason: &str) {}

    /// A reconnection attempt is scheduled; fires before the backoff delay.
    fn on_reconnection(&mut self, stream: &StreamHandle, attempt: u32) {}

    /// The reconnection attempt limit was reached. Fires at most once.
    fn on_stop_reconnection(&mut self, stream: &StreamHandle) {}

    fn on_exception(&mut self, stream: &StreamHandle, error: &SdkError) {}

    fn on_tick_update(&mut self, stream: &StreamHandle, tick: &Value) {}

    fn on_order_update(&mut self, stream: &StreamHandle, order: &Value) {}

    fn on_depth_update(&mut self, stream: &StreamHandle, depth: &Value) {}

    /// Login and subscription acknowledgements, passed through untouched.
    fn on_acknowledgement(&mut self, stream: &StreamHandle, ack: &Value) {}
}
