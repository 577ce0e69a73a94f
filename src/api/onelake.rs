//! OneLake file upload (DFS create, append, flush)
//!
//! Needs a storage-audience token, not the Fabric API token.

use reqwest::Method;

use super::client::{ApiError, FabricClient, Payload, SUCCESS};

/// Upload `data` to `Files/<file_path>` of a lakehouse, overwriting any
/// existing file. Returns the number of bytes written.
pub async fn upload_file(
    client: &FabricClient,
    storage_token: &str,
    workspace_id: &str,
    item_id: &str,
    file_path: &str,
    data: &[u8],
) -> Result<u64, ApiError> {
    let file_url = client.onelake_file_url(workspace_id, item_id, file_path)?;

    let mut create = file_url.clone();
    create.query_pairs_mut().append_pair("resource", "file");
    client
        .send(Method::PUT, create, storage_token, Payload::Empty, SUCCESS)
        .await?;

    let mut position: u64 = 0;
    for chunk in data.chunks(client.upload_chunk().max(1)) {
        let mut append = file_url.clone();
        append
            .query_pairs_mut()
            .append_pair("action", "append")
            .append_pair("position", &position.to_string());
        client
            .send(Method::PATCH, append, storage_token, Payload::Bytes(chunk.to_vec()), SUCCESS)
            .await?;
        position += chunk.len() as u64;
        tracing::debug!("Uploaded {}/{} bytes of {}", position, data.len(), file_path);
    }

    let mut flush = file_url;
    flush
        .query_pairs_mut()
        .append_pair("action", "flush")
        .append_pair("position", &position.to_string());
    client
        .send(Method::PATCH, flush, storage_token, Payload::Empty, SUCCESS)
        .await?;

    tracing::info!("Uploaded {} ({} bytes)", file_path, position);
    Ok(position)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use wiremock::matchers::{body_bytes, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_upload_appends_chunks_at_offsets() {
        let server = MockServer::start().await;
        let file = "/onelake/ws/lh/Files/in/data.csv";

        Mock::given(method("PUT"))
            .and(path(file))
            .and(query_param("resource", "file"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path(file))
            .and(query_param("action", "append"))
            .and(query_param("position", "0"))
            .and(body_bytes(b"abcd".to_vec()))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path(file))
            .and(query_param("action", "append"))
            .and(query_param("position", "4"))
            .and(body_bytes(b"ef".to_vec()))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path(file))
            .and(query_param("action", "flush"))
            .and(query_param("position", "6"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut settings = Settings::for_base(&server.uri());
        settings.upload_chunk_bytes = 4;
        let client = FabricClient::new(reqwest::Client::new(), &settings);

        let written = upload_file(&client, "S", "ws", "lh", "in/data.csv", b"abcdef")
            .await
            .unwrap();
        assert_eq!(written, 6);
    }

    #[tokio::test]
    async fn test_upload_stops_on_failed_create() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(202))
            .expect(0)
            .mount(&server)
            .await;

        let client = FabricClient::new(reqwest::Client::new(), &Settings::for_base(&server.uri()));
        let res = upload_file(&client, "S", "ws", "lh", "x.bin", b"123").await;
        assert!(matches!(res, Err(ApiError::Unauthorized)));
    }
}
