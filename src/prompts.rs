//! Prompt rendering for OCR, document-type validation, and field extraction.
//!
//! Everything here is a pure function of its inputs. The validation and extraction prompts read
//! the field table through a [`PromptBuilder`] borrowing an immutable [`DocumentTypeConfig`].

use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::doc_types::{DocumentTypeConfig, FieldDescriptor};

/// Field names listed per type in the validation prompt before truncating.
const VALIDATION_FIELD_PREVIEW: usize = 5;
const EXAMPLE_DATE: &str = "2024-01-15";
const EXAMPLE_NUMBER: i64 = 123;
const EXAMPLE_STRING: &str = "extracted_value";
const EXAMPLE_LIST: [&str; 2] = ["example_item1", "example_item2"];

/// Errors raised while rendering prompts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PromptError {
    /// No fields are configured for the type and no override was supplied.
    #[error("Unknown document type: {0}")]
    UnknownDocumentType(String),
}

/// Instruction sent to the OCR model when no anchor text is available.
pub fn default_ocr_prompt() -> &'static str {
    "Just return the plain text representation of this document as if you were reading it naturally."
}

/// Instruction sent to the OCR model together with text previously extracted by a local engine.
pub fn anchored_ocr_prompt(anchor_text: &str) -> String {
    format!(
        "Below is the image of one page of a document, as well as some raw textual content that \
         was previously extracted for it. Just return the plain text representation of this \
         document as if you were reading it naturally.\nDo not hallucinate.\n\
         RAW_TEXT_START\n{anchor_text}\nRAW_TEXT_END"
    )
}

/// Wrap OCR output in the tag the validation and extraction prompts refer to.
pub fn wrap_document_text(text: &str) -> String {
    format!("<document_text>{text}</document_text>")
}

/// Render fields as `    - name: description` lines.
pub fn format_field_list(fields: &[FieldDescriptor]) -> String {
    fields
        .iter()
        .map(|field| format!("    - {}: {}", field.name, field.description))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Placeholder value used in the example response for one field.
///
/// Priority: list-like description, then date-like description, then numeric-looking name.
pub fn example_value(field: &FieldDescriptor) -> Value {
    let description = field.description.to_lowercase();
    let name = field.name.to_lowercase();
    if description.contains("list") {
        json!(EXAMPLE_LIST)
    } else if description.contains("date") {
        json!(EXAMPLE_DATE)
    } else if ["number", "count", "amount"]
        .iter()
        .any(|marker| name.contains(marker))
    {
        json!(EXAMPLE_NUMBER)
    } else {
        json!(EXAMPLE_STRING)
    }
}

/// Example JSON object with one entry per field, in field order.
pub fn example_response(fields: &[FieldDescriptor]) -> Map<String, Value> {
    fields
        .iter()
        .map(|field| (field.name.clone(), example_value(field)))
        .collect()
}

/// Renders the type-validation and extraction prompts from a document-type table.
#[derive(Debug, Clone, Copy)]
pub struct PromptBuilder<'a> {
    config: &'a DocumentTypeConfig,
}

impl<'a> PromptBuilder<'a> {
    /// Bind the builder to a taxonomy.
    pub fn new(config: &'a DocumentTypeConfig) -> Self {
        Self { config }
    }

    /// Taxonomy the prompts are rendered from.
    pub fn config(&self) -> &'a DocumentTypeConfig {
        self.config
    }

    /// System prompt asking the model to confirm `candidate_type` or name a better one.
    pub fn validation_prompt(&self, candidate_type: &str) -> String {
        let mut available = String::new();
        for (document_type, fields) in self.config.iter() {
            available.push_str(&format!(
                "- {document_type} \n  Fields: {} \n\n\n\n",
                preview_field_names(fields)
            ));
        }

        format!(
            r#"
    <document_type_validation_task>
        <context>
            <current_selection>{candidate_type}</current_selection>
            <objective>
            Validate if the current document type selection is appropriate based on the <available_document_types> and the <document_text> provided by the user.
            </objective>
        </context>

        <instructions>
            <requirement>Review the document content and the document fields for each document type.</requirement>
            <requirement>If the current document type selection seems appropriate, return the <current_selection> value. </requirement>
            <requirement>If a different document type would be more appropriate, respond with ONLY that document type name.</requirement>
            <requirement>Consider whether the document content matches the expected fields.</requirement>
            <requirement>Your response must be a single word - either the <current_selection> value or the alternative document type name.</requirement>
        </instructions>

        <available_document_types>
{available}        </available_document_types>

        <response_format>
            - Single word only
            - Either the <current_selection> value or an alternative document type name
            - No explanations, no additional text
        </response_format>
    </document_type_validation_task>"#
        )
    }

    /// System prompt asking the model to extract `document_type`'s fields as a JSON object.
    ///
    /// `fields` overrides the configured list; without it an unknown type is an error.
    pub fn extraction_prompt(
        &self,
        document_type: &str,
        fields: Option<&[FieldDescriptor]>,
    ) -> Result<String, PromptError> {
        let fields = match fields {
            Some(fields) => fields,
            None => self
                .config
                .fields(document_type)
                .ok_or_else(|| PromptError::UnknownDocumentType(document_type.to_string()))?,
        };

        let field_list = format_field_list(fields);
        let example = render_example(&example_response(fields));

        Ok(format!(
            r#"
    <document_extraction_task>
        <context>
            <document_type>{document_type}</document_type>
            <extraction_objective>
            Extract specific structured data from the <document_text> that will be provided by the user and return it in a standardized JSON format.
            </extraction_objective>
        </context>

        <instructions>
            <requirement>You MUST extract ALL of the following fields from the document text below.</requirement>
            <requirement>Each field MUST be included in your response, even if the value is null or empty.</requirement>
            <requirement>You MUST return ONLY a valid JSON object with no additional text, explanation, or markdown formatting.</requirement>
            <requirement>Extract values exactly as they appear in the document without interpretation unless explicitly required by field type.</requirement>
        </instructions>

        <output_format>
            <format_type>JSON</format_type>
            <format_requirements>
            - Valid JSON syntax only
            - No markdown code blocks
            - No explanatory text before or after
            - No comments within JSON
            - Use null for missing values
            - Maintain original data types (strings as strings, numbers as numbers)
            </format_requirements>
        </output_format>

        <fields_to_extract>
        {field_list}
        </fields_to_extract>

        <example_response_format>
            {example}
        </example_response_format>

    </document_extraction_task>"#
        ))
    }
}

fn preview_field_names(fields: &[FieldDescriptor]) -> String {
    let shown: Vec<&str> = fields
        .iter()
        .take(VALIDATION_FIELD_PREVIEW)
        .map(|field| field.name.as_str())
        .collect();
    let mut preview = shown.join(", ");
    let hidden = fields.len().saturating_sub(VALIDATION_FIELD_PREVIEW);
    if hidden > 0 {
        preview.push_str(&format!(", ... (+{hidden} more)"));
    }
    preview
}

fn render_example(example: &Map<String, Value>) -> String {
    let pretty = serde_json::to_string_pretty(example).unwrap_or_else(|_| "{}".to_string());
    pretty
        .lines()
        .enumerate()
        .map(|(index, line)| {
            if index == 0 {
                line.to_string()
            } else {
                format!("            {line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> PromptBuilder<'static> {
        PromptBuilder::new(DocumentTypeConfig::builtin())
    }

    fn example_section(prompt: &str) -> &str {
        let start = prompt.find("<example_response_format>").expect("start tag");
        let end = prompt.find("</example_response_format>").expect("end tag");
        &prompt[start + "<example_response_format>".len()..end]
    }

    #[test]
    fn anchored_prompt_embeds_raw_text() {
        let prompt = anchored_ocr_prompt("This is sample text");
        assert!(prompt.starts_with("Below is the image of one page of a document"));
        assert!(prompt.contains("Do not hallucinate"));
        assert!(prompt.contains("RAW_TEXT_START\nThis is sample text\nRAW_TEXT_END"));
        assert!(anchored_ocr_prompt("").contains("RAW_TEXT_START\n\nRAW_TEXT_END"));
    }

    #[test]
    fn field_list_uses_indented_bullets() {
        let fields = [
            FieldDescriptor::new("field1", "Description 1"),
            FieldDescriptor::new("field2", "Description 2"),
        ];
        assert_eq!(
            format_field_list(&fields),
            "    - field1: Description 1\n    - field2: Description 2"
        );
    }

    #[test]
    fn validation_prompt_lists_every_type() {
        let prompt = builder().validation_prompt("invoice");
        assert!(prompt.contains("<current_selection>invoice</current_selection>"));
        for document_type in DocumentTypeConfig::builtin().document_types() {
            assert!(prompt.contains(&format!("- {document_type} \n  Fields: ")));
        }
        assert!(prompt.contains(
            "Fields: invoice_number, invoice_date, due_date, vendor_details, total_amount \n"
        ));
        assert!(prompt.contains("Single word only"));
    }

    #[test]
    fn validation_prompt_truncates_long_field_lists() {
        let fields: Vec<_> = (1..=7)
            .map(|index| FieldDescriptor::new(format!("f{index}"), "A field"))
            .collect();
        let config = DocumentTypeConfig::new(vec![("wide".into(), fields)]).expect("config");
        let prompt = PromptBuilder::new(&config).validation_prompt("wide");
        assert!(prompt.contains("Fields: f1, f2, f3, f4, f5, ... (+2 more) \n"));
        assert!(!prompt.contains("f6"));
    }

    #[test]
    fn extraction_prompt_covers_every_configured_field() {
        let builder = builder();
        for (document_type, fields) in DocumentTypeConfig::builtin().iter() {
            let prompt = builder
                .extraction_prompt(document_type, None)
                .expect("configured type");
            assert!(prompt.contains(&format!("<document_type>{document_type}</document_type>")));
            for field in fields {
                assert!(prompt.contains(&format!("- {}: {}", field.name, field.description)));
            }

            let example: Map<String, Value> =
                serde_json::from_str(example_section(&prompt).trim()).expect("example is JSON");
            assert_eq!(example.len(), fields.len());
            let keys: Vec<_> = example.keys().map(String::as_str).collect();
            let names: Vec<_> = fields.iter().map(|field| field.name.as_str()).collect();
            assert_eq!(keys, names);
        }
    }

    #[test]
    fn extraction_prompt_rejects_unknown_type_without_override() {
        let error = builder()
            .extraction_prompt("invalid_type", None)
            .expect_err("unknown type");
        assert_eq!(error.to_string(), "Unknown document type: invalid_type");
    }

    #[test]
    fn extraction_prompt_accepts_override_fields_for_any_type() {
        let fields = [
            FieldDescriptor::new("custom_field1", "Custom description 1"),
            FieldDescriptor::new("custom_field2", "Custom description 2"),
        ];
        let prompt = builder()
            .extraction_prompt("any_type", Some(&fields))
            .expect("override");
        assert!(prompt.contains("custom_field1: Custom description 1"));
        assert!(prompt.contains("custom_field2: Custom description 2"));
        assert!(prompt.contains("<document_type>any_type</document_type>"));
        assert!(example_section(&prompt).contains("\"custom_field1\": \"extracted_value\""));
    }

    #[test]
    fn example_values_follow_heuristic_priority() {
        let cases = [
            (("birth_date", "Date of birth"), json!("2024-01-15")),
            (("skills_list", "List of skills"), json!(["example_item1", "example_item2"])),
            (("total_amount", "Total amount"), json!(123)),
            (("item_count", "Number of items"), json!(123)),
            (("salary_number", "Salary number"), json!(123)),
            (("regular_field", "Just a field"), json!("extracted_value")),
            (("dates_number", "A list of dates"), json!(["example_item1", "example_item2"])),
            (("due_number", "Due date"), json!("2024-01-15")),
        ];
        for ((name, description), expected) in cases {
            let value = example_value(&FieldDescriptor::new(name, description));
            assert_eq!(value, expected, "field {name}");
        }
    }
}
