//! Drives the controller and the live renderer with a scripted flaky endpoint.
//!
//! Every 33rd request fails once with a transport error, every 40th is rate
//! limited once. Press Ctrl-C to abort (exit status 2).

use std::time::Duration;

use request_flow::{
    AdaptiveRequestController, Completion, FlowError, FlowOptions, SequenceRenderer,
};

const REQUESTS_PER_BATCH: u64 = 100;
const REQUESTS_ESTIMATED: u64 = 90;
const RESPONSE_SIZE: u64 = 16_484;

async fn simulate_batch(
    controller: &mut AdaptiveRequestController<SequenceRenderer>,
    response_time: Duration,
) -> request_flow::Result<()> {
    controller.reinit(Some(REQUESTS_ESTIMATED));
    controller.before_batch(&format!("simulated endpoint, {response_time:?} per response"));

    for request_num in 1..=REQUESTS_PER_BATCH {
        controller
            .perform(|attempt| async move {
                tokio::time::sleep(response_time).await;
                if request_num % 33 == 3 && attempt == 1 {
                    return Err(FlowError::Transport(format!(
                        "Sorry Marty, we blew it all #{request_num}"
                    )));
                }
                if request_num % 40 == 20 && attempt == 1 {
                    return Ok(Completion::new(String::new(), 429).with_retry_after(Some(2.0)));
                }
                let status = 200 + (request_num % 10) as u16;
                Ok(Completion::new(String::new(), status).with_size(RESPONSE_SIZE))
            })
            .await?;
    }

    controller.after_batch();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = FlowOptions::from_env().map_err(anyhow::Error::msg)?;
    let renderer = SequenceRenderer::stdout().with_options(&options);
    let mut controller = AdaptiveRequestController::with_hooks(options, renderer);

    let run = async {
        simulate_batch(&mut controller, Duration::from_millis(50)).await?;
        simulate_batch(&mut controller, Duration::from_millis(400)).await
    };

    tokio::select! {
        result = run => result?,
        _ = tokio::signal::ctrl_c() => {
            println!();
            std::process::exit(2);
        }
    }

    Ok(())
}
