use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use httpmock::{Method::POST, MockServer};
use rustyidu::completion::{
    AnthropicCompletionClient, CompletionClient, CompletionError, CompletionSettings,
};
use rustyidu::embedding::HashedEmbeddingClient;
use rustyidu::index::{
    InMemoryIndex, IndexError, IndexHandle, QueryResult, SimilarityIndex, SimilarityMatch,
};
use rustyidu::ocr::{ImageInput, OcrEngine, OcrError};
use rustyidu::pipeline::{Pipeline, PipelineError};
use rustyidu::retry::{RetryPolicy, Wait};
use serde_json::{Map, Value, json};

struct StaticOcr(&'static str);

#[async_trait]
impl OcrEngine for StaticOcr {
    fn name(&self) -> &'static str {
        "static"
    }

    fn extract_text(&self, _image: &ImageInput, _anchor: bool) -> Result<String, OcrError> {
        Ok(self.0.to_string())
    }

    async fn extract_text_async(
        &self,
        image: &ImageInput,
        anchor: bool,
    ) -> Result<String, OcrError> {
        self.extract_text(image, anchor)
    }
}

/// Index that always answers with the same neighbours.
struct FixedIndex(Vec<SimilarityMatch>);

#[async_trait]
impl SimilarityIndex for FixedIndex {
    fn backend(&self) -> &'static str {
        "fixed"
    }

    async fn get_or_create_index(
        &self,
        _name: &str,
        _embedder: Option<Arc<dyn rustyidu::embedding::EmbeddingClient>>,
        _metadata: Option<Map<String, Value>>,
    ) -> Result<IndexHandle, IndexError> {
        Err(IndexError::Uninitialized)
    }

    async fn add(
        &self,
        _documents: Vec<String>,
        _metadatas: Vec<Map<String, Value>>,
        _ids: Option<Vec<String>>,
    ) -> Result<(), IndexError> {
        Ok(())
    }

    async fn query(&self, _text: &str, limit: usize) -> Result<QueryResult, IndexError> {
        Ok(QueryResult::from_matches(
            self.0.iter().take(limit).cloned().collect(),
        ))
    }
}

/// Completion client replaying canned replies and recording system prompts.
#[derive(Default)]
struct ScriptedCompletion {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|reply| reply.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts").clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn complete(
        &self,
        system_prompt: &str,
        _user_content: &str,
    ) -> Result<String, CompletionError> {
        self.prompts
            .lock()
            .expect("prompts")
            .push(system_prompt.to_string());
        self.replies
            .lock()
            .expect("replies")
            .pop_front()
            .ok_or_else(|| CompletionError::InvalidResponse("script exhausted".into()))
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

fn neighbour(document_type: &str, confidence: f64) -> SimilarityMatch {
    let mut metadata = Map::new();
    metadata.insert("document_type".into(), json!(document_type));
    SimilarityMatch {
        id: "doc-1".into(),
        document: "stored text".into(),
        metadata,
        distance: 0.3,
        confidence,
    }
}

fn pipeline(index: FixedIndex, completion: Arc<ScriptedCompletion>) -> Pipeline {
    Pipeline::new(
        Arc::new(StaticOcr("MEMO\nTo: staff\nFrom: HR")),
        Arc::new(index),
        completion,
    )
}

#[tokio::test]
async fn validation_override_clears_confidence() {
    let completion = ScriptedCompletion::new(&["letter", r#"{"sender_name": "HR"}"#]);
    let pipeline = pipeline(FixedIndex(vec![neighbour("memo", 0.8)]), completion.clone());

    let result = pipeline.run(vec![1, 2, 3]).await.expect("result");

    assert_eq!(result.document_type, "letter");
    assert_eq!(result.confidence, None);
    assert_eq!(result.entities["sender_name"], "HR");
    assert!(result.processing_time >= 0.0);

    let prompts = completion.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].contains("<current_selection>memo</current_selection>"));
    assert!(prompts[1].contains("<document_type>letter</document_type>"));

    let metrics = pipeline.metrics();
    assert_eq!(metrics.runs_completed, 1);
    assert_eq!(metrics.type_overrides, 1);
}

#[tokio::test]
async fn agreement_keeps_retrieval_confidence() {
    let completion = ScriptedCompletion::new(&["  Memo\n", r#"{"subject": "Leave policy"}"#]);
    let pipeline = pipeline(FixedIndex(vec![neighbour("memo", 0.8)]), completion);

    let result = pipeline.run(vec![1]).await.expect("result");

    assert_eq!(result.document_type, "memo");
    assert_eq!(result.confidence, Some(0.8));
    assert_eq!(pipeline.metrics().type_overrides, 0);
}

#[tokio::test]
async fn unknown_validated_type_fails_the_run() {
    let completion = ScriptedCompletion::new(&["receipt", "{}"]);
    let pipeline = pipeline(FixedIndex(vec![neighbour("memo", 0.8)]), completion.clone());

    let error = pipeline.run(vec![1]).await.expect_err("unknown type");

    assert!(matches!(error, PipelineError::UnknownDocumentType(ref name) if name == "receipt"));
    assert_eq!(completion.prompts().len(), 1);
    assert_eq!(pipeline.metrics().runs_failed, 1);
}

#[tokio::test]
async fn empty_index_reports_no_matches() {
    let completion = ScriptedCompletion::new(&[]);
    let pipeline = pipeline(FixedIndex(Vec::new()), completion.clone());

    let error = pipeline.run(vec![1]).await.expect_err("no neighbours");

    assert!(matches!(error, PipelineError::NoMatches));
    assert!(completion.prompts().is_empty());
}

#[tokio::test]
async fn unstructured_extraction_reply_is_a_parse_error() {
    let completion = ScriptedCompletion::new(&["memo", "I could not find any fields."]);
    let pipeline = pipeline(FixedIndex(vec![neighbour("memo", 0.8)]), completion);

    let error = pipeline.run(vec![1]).await.expect_err("prose reply");

    assert!(matches!(error, PipelineError::Parse(_)));
}

#[tokio::test]
async fn custom_retry_policy_reruns_the_whole_pipeline() {
    let completion = ScriptedCompletion::new(&["bogus", "memo", r#"{"subject": "Parking"}"#]);
    let pipeline = pipeline(FixedIndex(vec![neighbour("memo", 0.8)]), completion.clone())
        .with_retry_policy(RetryPolicy::new("test", 2, Wait::none(), |error| {
            matches!(error, PipelineError::UnknownDocumentType(_))
        }));

    let result = pipeline.run(vec![1]).await.expect("second attempt succeeds");

    assert_eq!(result.document_type, "memo");
    assert_eq!(result.entities["subject"], "Parking");
    assert_eq!(completion.prompts().len(), 3);
}

#[test]
fn blocking_entry_point_runs_outside_a_runtime() {
    let completion = ScriptedCompletion::new(&["memo", "{'subject': 'Fire drill'}"]);
    let pipeline = pipeline(FixedIndex(vec![neighbour("memo", 0.75)]), completion);

    let result = pipeline.run_blocking(vec![1]).expect("result");

    assert_eq!(result.document_type, "memo");
    assert_eq!(result.confidence, Some(0.75));
    assert_eq!(result.entities["subject"], "Fire drill");
}

const INVOICE_TEXT: &str = "INVOICE INV-001\nBill to: Acme Corp\nTotal due: 99.50 USD";

#[tokio::test]
async fn invoice_flows_through_index_and_model() {
    let index = InMemoryIndex::new(Arc::new(HashedEmbeddingClient::new(64)));
    index
        .get_or_create_index("idu_collection", None, None)
        .await
        .expect("collection");
    index
        .add(
            vec![
                INVOICE_TEXT.to_string(),
                "MEMO\nTo: all staff\nRe: office closure".to_string(),
            ],
            vec![
                serde_json::from_value(json!({ "document_type": "invoice" })).expect("map"),
                serde_json::from_value(json!({ "document_type": "memo" })).expect("map"),
            ],
            None,
        )
        .await
        .expect("add");

    let server = MockServer::start_async().await;
    let validation = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/messages")
                .body_contains("document_type_validation_task")
                .body_contains("<current_selection>invoice</current_selection>");
            then.status(200).json_body(json!({
                "content": [ { "type": "text", "text": "invoice" } ]
            }));
        })
        .await;
    let extraction = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/messages")
                .body_contains("document_extraction_task");
            then.status(200).json_body(json!({
                "content": [ {
                    "type": "text",
                    "text": "```json\n{\"invoice_number\": \"INV-001\", \"total_amount\": 99.5}\n```"
                } ]
            }));
        })
        .await;

    let completion = AnthropicCompletionClient::new(
        "test-key".into(),
        CompletionSettings {
            model: "claude-test".into(),
            temperature: 0.1,
            max_tokens: 2000,
        },
    )
    .expect("client")
    .with_base_url(server.base_url());

    let pipeline = Pipeline::new(
        Arc::new(StaticOcr(INVOICE_TEXT)),
        Arc::new(index),
        Arc::new(completion),
    );
    let result = pipeline.run(vec![0xFF]).await.expect("result");

    validation.assert_async().await;
    extraction.assert_async().await;
    assert_eq!(result.document_type, "invoice");
    assert_eq!(result.confidence, Some(0.993));
    assert_eq!(result.entities["invoice_number"], "INV-001");
    assert_eq!(result.entities["total_amount"], 99.5);
}

#[tokio::test]
async fn invoice_scenario_returns_every_invoice_field() {
    let completion = ScriptedCompletion::new(&[
        "invoice",
        r#"{"invoice_number": "123", "invoice_date": null, "due_date": null,
            "vendor_details": null, "total_amount": "$450"}"#,
    ]);
    let pipeline = Pipeline::new(
        Arc::new(StaticOcr("INVOICE #123 Total: $450")),
        Arc::new(FixedIndex(vec![neighbour("invoice", 0.91)])),
        completion.clone(),
    );

    let result = pipeline.run(vec![0x89, 0x50]).await.expect("result");

    assert_eq!(result.document_type, "invoice");
    assert_eq!(result.confidence, Some(0.91));
    for key in [
        "invoice_number",
        "invoice_date",
        "due_date",
        "vendor_details",
        "total_amount",
    ] {
        assert!(result.entities.contains_key(key), "missing {key}");
    }
    assert_eq!(result.entities["invoice_number"], "123");
    assert_eq!(result.entities["total_amount"], "$450");
    assert!(completion.prompts()[1].contains("invoice_number"));
}

/// OCR engine with only a synchronous path.
struct BlockingOnlyOcr;

#[async_trait]
impl OcrEngine for BlockingOnlyOcr {
    fn name(&self) -> &'static str {
        "blocking-only"
    }

    fn extract_text(&self, _image: &ImageInput, _anchor: bool) -> Result<String, OcrError> {
        Ok("MEMO\nTo: staff".to_string())
    }

    async fn extract_text_async(
        &self,
        _image: &ImageInput,
        _anchor: bool,
    ) -> Result<String, OcrError> {
        Err(OcrError::Unsupported("async extraction"))
    }

    fn supports_async(&self) -> bool {
        false
    }
}

#[tokio::test]
async fn blocking_only_ocr_engine_completes_a_run() {
    let completion = ScriptedCompletion::new(&["memo", r#"{"recipient": "staff"}"#]);
    let pipeline = Pipeline::new(
        Arc::new(BlockingOnlyOcr),
        Arc::new(FixedIndex(vec![neighbour("memo", 0.8)])),
        completion,
    );

    let result = pipeline.run(vec![1]).await.expect("result");

    assert_eq!(result.document_type, "memo");
    assert_eq!(result.entities["recipient"], "staff");
}
