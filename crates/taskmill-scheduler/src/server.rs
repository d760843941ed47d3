use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use taskmill_core::Status;
use taskmill_protocol::{
    Message, MessageCodec, PollResponse, ProgressResponse, RegisteredResponse, SchedulerApi,
    TaskResponse,
};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Serve the scheduler protocol until `shutdown` is cancelled
pub async fn serve(
    listener: TcpListener,
    scheduler: Arc<dyn SchedulerApi>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    info!("Scheduler listening on {}", listener.local_addr()?);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!("New connection from {}", addr);
                        let scheduler = scheduler.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            tokio::select! {
                                result = handle_connection(stream, scheduler) => {
                                    if let Err(e) = result {
                                        error!("Connection error: {}", e);
                                    }
                                }
                                _ = shutdown.cancelled() => {}
                            }
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
            _ = shutdown.cancelled() => {
                info!("Shutting down scheduler");
                break;
            }
        }
    }

    Ok(())
}

async fn handle_connection(stream: TcpStream, scheduler: Arc<dyn SchedulerApi>) -> anyhow::Result<()> {
    let mut framed = Framed::new(stream, MessageCodec);

    while let Some(result) = framed.next().await {
        match result {
            Ok(message) => {
                let response = handle_message(scheduler.as_ref(), message).await;
                framed.send(response).await?;
            }
            Err(e) => {
                error!("Protocol error: {}", e);
                break;
            }
        }
    }

    Ok(())
}

/// Run one request against the scheduler and build its response
pub async fn handle_message(scheduler: &dyn SchedulerApi, message: Message) -> Message {
    let result = match message {
        Message::RegisterTask(req) => scheduler
            .register_task(req)
            .await
            .map(|task_id| Message::Registered(RegisteredResponse { task_id })),
        Message::GetTask(req) => scheduler
            .get_task(&req.task_id)
            .await
            .map(|task| Message::TaskFound(TaskResponse { task })),
        Message::AbortTask(req) => scheduler.abort_task(&req.task_id).await.map(|_| Message::Ack),
        Message::LongPoll(req) => scheduler
            .long_poll(req)
            .await
            .map(|task| Message::Polled(PollResponse { task })),
        Message::AcceptTask(req) => scheduler.accept_task(&req.task_id).await.map(|_| Message::Ack),
        Message::CompleteTask(req) => scheduler.complete_task(req).await.map(|_| Message::Ack),
        Message::ReportProgress(req) => scheduler
            .report_progress(&req.task_id, req.progress)
            .await
            .map(|aborted| Message::Progress(ProgressResponse { aborted })),
        other => {
            return Message::Error(Status::invalid_argument(format!(
                "unsupported request: {}",
                other.name()
            )))
        }
    };

    result.unwrap_or_else(|e| Message::Error(e.to_status()))
}
