//! Processor Task - API request and DSP event processing
//!
//! The processor owns the [`Kymera`] session. It waits for either an API request or a
//! DSP event, applies it, and then runs every deferred request that has become eligible.
//! Outcomes of processed requests are published for [`api::next_outcome`].
//!
//! # Usage
//!
//! Spawn the processor as an Embassy task that owns the session:
//!
//! ```rust,ignore
//! use budgie::{Kymera, KymeraOptions, processor};
//!
//! #[embassy_executor::task]
//! async fn audio_task(platform: Board) -> ! {
//!     let mut kymera = Kymera::new(platform, KymeraOptions::default());
//!     processor::run(&mut kymera).await
//! }
//! ```
//!
//! # Architecture
//!
//! * **API requests**: answered on the response channel once queued or rejected
//! * **DSP events**: tone end and stream disconnects, no response
//! * **Deferred queue**: drained after every request or event
//!
//! [`api::next_outcome`]: crate::api::next_outcome

use crate::{DSP_EVENT_CHANNEL, Kymera, OUTCOME_CHANNEL, REQUEST_CHANNEL, RESPONSE_CHANNEL, platform::Platform};
use embassy_futures::select::{Either, select};

/// Serve one API request or DSP event, then drain the deferred queue
///
/// Returns the number of deferred requests processed.
pub async fn process_next<P: Platform>(kymera: &mut Kymera<P>) -> usize {
    match select(
        REQUEST_CHANNEL.receiver().receive(),
        DSP_EVENT_CHANNEL.receiver().receive(),
    )
    .await
    {
        Either::First(request) => {
            debug!("[PROCESSOR] API request: {:?}", request);
            let response = kymera.submit(request);
            debug!("[PROCESSOR] API response: {:?}", response);
            RESPONSE_CHANNEL.sender().send(response).await;
        }
        Either::Second(event) => {
            debug!("[PROCESSOR] DSP event: {:?}", event);
            kymera.handle_dsp_event(event);
        }
    }
    kymera.run_pending(|outcome| {
        if OUTCOME_CHANNEL.sender().try_send(*outcome).is_err() {
            trace!("[PROCESSOR] Outcome dropped: {:?}", outcome.kind);
        }
    })
}

/// Run the audio session processor
pub async fn run<P: Platform>(kymera: &mut Kymera<P>) -> ! {
    info!("[PROCESSOR] Started");
    loop {
        process_next(kymera).await;
    }
}
