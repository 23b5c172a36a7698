use std::net::SocketAddr;
use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use tonic::{transport::Server, Request, Response, Status};
use tracing::{error, info};
use uuid::Uuid;

use crate::engine::ChatEngine;
use crate::error::AnalysisError;
use crate::proto::chat::{
    chat_service_server::{ChatService, ChatServiceServer},
    AnswerChunk, AskRequest, CloseSessionRequest, CloseSessionResponse, GetTranscriptRequest,
    GetTranscriptResponse, HealthCheckRequest, HealthCheckResponse, ListSessionsRequest,
    ListSessionsResponse, UploadArchiveRequest, UploadArchiveResponse,
};

pub struct GrpcServer {
    engine: Arc<ChatEngine>,
}

impl GrpcServer {
    pub fn new(engine: Arc<ChatEngine>) -> Self {
        Self { engine }
    }

    pub async fn start(&self, addr: SocketAddr) -> Result<(), AnalysisError> {
        info!("Starting gRPC server on {}", addr);

        let chat_service = ChatServiceImpl {
            engine: self.engine.clone(),
        };

        Server::builder()
            .add_service(ChatServiceServer::new(chat_service))
            .serve(addr)
            .await?;

        Ok(())
    }
}

fn parse_session_id(raw: &str) -> Result<Uuid, Status> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| Status::invalid_argument(format!("Invalid session id '{}'", raw)))
}

struct ChatServiceImpl {
    engine: Arc<ChatEngine>,
}

#[tonic::async_trait]
impl ChatService for ChatServiceImpl {
    type AskStream = BoxStream<'static, Result<AnswerChunk, Status>>;

    async fn upload_archive(
        &self,
        request: Request<UploadArchiveRequest>,
    ) -> Result<Response<UploadArchiveResponse>, Status> {
        let req = request.into_inner();
        info!(
            "gRPC: Received upload_archive request for '{}' ({} bytes)",
            req.filename,
            req.archive.len()
        );

        let session_id = if req.session_id.trim().is_empty() {
            None
        } else {
            Some(parse_session_id(&req.session_id)?)
        };

        match self
            .engine
            .upload_archive(session_id, &req.filename, &req.archive)
            .await
        {
            Ok(summary) => {
                info!(
                    "gRPC: Session {} now has {} tables ({} failed)",
                    summary.session_id,
                    summary.tables.len(),
                    summary.failures.len()
                );
                Ok(Response::new(UploadArchiveResponse {
                    session_id: summary.session_id.to_string(),
                    tables: summary.tables.iter().map(Into::into).collect(),
                    failures: summary.failures.into_iter().map(Into::into).collect(),
                }))
            }
            Err(e) => {
                error!("gRPC: Failed to upload '{}': {}", req.filename, e);
                Err(Status::from(e))
            }
        }
    }

    async fn ask(
        &self,
        request: Request<AskRequest>,
    ) -> Result<Response<Self::AskStream>, Status> {
        let req = request.into_inner();
        let session_id = parse_session_id(&req.session_id)?;
        info!(
            "gRPC: Received ask request for session {}: {}",
            session_id, req.question
        );

        let answer = self
            .engine
            .ask(session_id, req.question)
            .await
            .map_err(Status::from)?;

        let chunks = answer.map(|text| Ok(AnswerChunk { text })).boxed();
        Ok(Response::new(chunks))
    }

    async fn close_session(
        &self,
        request: Request<CloseSessionRequest>,
    ) -> Result<Response<CloseSessionResponse>, Status> {
        let req = request.into_inner();
        let session_id = parse_session_id(&req.session_id)?;
        info!("gRPC: Received close_session request for session {}", session_id);

        match self.engine.close_session(session_id).await {
            Ok(()) => Ok(Response::new(CloseSessionResponse {})),
            Err(e) => {
                error!("gRPC: Failed to close session {}: {}", session_id, e);
                Err(Status::from(e))
            }
        }
    }

    async fn list_sessions(
        &self,
        _request: Request<ListSessionsRequest>,
    ) -> Result<Response<ListSessionsResponse>, Status> {
        info!("gRPC: Received list_sessions request");

        let sessions = self.engine.list_sessions().await.map_err(Status::from)?;
        let response = ListSessionsResponse {
            session_ids: sessions.iter().map(Uuid::to_string).collect(),
        };

        info!("gRPC: Returning {} sessions", response.session_ids.len());
        Ok(Response::new(response))
    }

    async fn get_transcript(
        &self,
        request: Request<GetTranscriptRequest>,
    ) -> Result<Response<GetTranscriptResponse>, Status> {
        let req = request.into_inner();
        let session_id = parse_session_id(&req.session_id)?;
        info!("gRPC: Received get_transcript request for session {}", session_id);

        match self.engine.transcript(session_id).await {
            Ok(turns) => Ok(Response::new(GetTranscriptResponse {
                turns: turns.into_iter().map(Into::into).collect(),
            })),
            Err(e) => {
                error!(
                    "gRPC: Failed to load transcript for session {}: {}",
                    session_id, e
                );
                Err(Status::from(e))
            }
        }
    }

    async fn health_check(
        &self,
        _request: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        info!("gRPC: Received health_check request");

        match self.engine.health_check().await {
            Ok(_) => {
                info!("gRPC: Health check passed");
                Ok(Response::new(HealthCheckResponse {
                    status: "healthy".to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                }))
            }
            Err(e) => {
                error!("gRPC: Health check failed: {}", e);
                Err(Status::internal("Health check failed"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::build_zip;
    use crate::config::EngineConfig;
    use crate::history::InMemoryChatHistory;
    use crate::llm_client::tests::ScriptedModel;

    fn service(replies: Vec<Result<String, AnalysisError>>) -> ChatServiceImpl {
        let config = EngineConfig::from_lookup(|key| (key == "LLM_API_KEY").then(|| "k".to_string()))
            .unwrap();
        let engine = ChatEngine::new(
            &config,
            Arc::new(ScriptedModel::new(replies)),
            Arc::new(InMemoryChatHistory::new()),
        );
        ChatServiceImpl {
            engine: Arc::new(engine),
        }
    }

    async fn upload(service: &ChatServiceImpl) -> String {
        let request = UploadArchiveRequest {
            session_id: String::new(),
            filename: "data.zip".to_string(),
            archive: build_zip(&[("a.csv", "name\nX\nX\n")]),
        };
        let response = service.upload_archive(Request::new(request)).await.unwrap();
        response.into_inner().session_id
    }

    #[tokio::test]
    async fn ask_streams_answer_chunks() {
        let service = service(vec![
            Ok("SELECT COUNT(*) AS count FROM Table1".to_string()),
            Ok("Two entries.".to_string()),
        ]);
        let session_id = upload(&service).await;

        let response = service
            .ask(Request::new(AskRequest {
                session_id,
                question: "how many entries".to_string(),
            }))
            .await
            .unwrap();
        let chunks: Vec<String> = response
            .into_inner()
            .map(|chunk| chunk.unwrap().text)
            .collect()
            .await;

        assert_eq!(chunks, vec!["Two ", "entries. "]);
    }

    #[tokio::test]
    async fn closed_session_rejects_questions() {
        let service = service(vec![]);
        let session_id = upload(&service).await;

        service
            .close_session(Request::new(CloseSessionRequest {
                session_id: session_id.clone(),
            }))
            .await
            .unwrap();

        let status = service
            .ask(Request::new(AskRequest {
                session_id,
                question: "anything".to_string(),
            }))
            .await
            .err()
            .unwrap();
        assert_eq!(status.code(), tonic::Code::NotFound);
    }

    #[test]
    fn session_ids_must_be_uuids() {
        let id = Uuid::new_v4();
        assert_eq!(parse_session_id(&format!(" {} ", id)).unwrap(), id);

        let status = parse_session_id("abc").unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }
}
