//! Static document-type taxonomy.
//!
//! Each document type maps to an ordered list of [`FieldDescriptor`]s that drive both the
//! type-validation prompt and the field-extraction prompt. The built-in table is compiled into
//! the binary and exposed through [`DocumentTypeConfig::builtin`]; it is never mutated at
//! runtime, so concurrent readers need no synchronization.

use std::collections::HashSet;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while assembling a taxonomy.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DocumentTypeError {
    /// The same document type was declared twice.
    #[error("Duplicate document type: {0}")]
    DuplicateType(String),
    /// A field name appears twice within one document type.
    #[error("Duplicate field '{field}' in document type '{document_type}'")]
    DuplicateField {
        /// Document type containing the duplicate.
        document_type: String,
        /// Repeated field name.
        field: String,
    },
}

/// One extractable field of a document type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// JSON key the model must emit.
    pub name: String,
    /// Human-readable guidance shown to the model.
    pub description: String,
}

impl FieldDescriptor {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Ordered mapping from document-type identifier to its field descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentTypeConfig {
    entries: Vec<(String, Vec<FieldDescriptor>)>,
}

impl DocumentTypeConfig {
    /// Build a taxonomy, rejecting duplicate types and duplicate field names within a type.
    pub fn new(
        entries: Vec<(String, Vec<FieldDescriptor>)>,
    ) -> Result<Self, DocumentTypeError> {
        let mut types = HashSet::new();
        for (document_type, fields) in &entries {
            if !types.insert(document_type.as_str()) {
                return Err(DocumentTypeError::DuplicateType(document_type.clone()));
            }
            let mut names = HashSet::new();
            for field in fields {
                if !names.insert(field.name.as_str()) {
                    return Err(DocumentTypeError::DuplicateField {
                        document_type: document_type.clone(),
                        field: field.name.clone(),
                    });
                }
            }
        }
        Ok(Self { entries })
    }

    /// The taxonomy shipped with the crate.
    pub fn builtin() -> &'static Self {
        &BUILTIN
    }

    /// Fields configured for `document_type`, if known.
    pub fn fields(&self, document_type: &str) -> Option<&[FieldDescriptor]> {
        self.entries
            .iter()
            .find(|(name, _)| name == document_type)
            .map(|(_, fields)| fields.as_slice())
    }

    /// Whether `document_type` is a configured key.
    pub fn contains(&self, document_type: &str) -> bool {
        self.fields(document_type).is_some()
    }

    /// Document types in declaration order.
    pub fn document_types(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// `(type, fields)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[FieldDescriptor])> {
        self.entries
            .iter()
            .map(|(name, fields)| (name.as_str(), fields.as_slice()))
    }

    /// Number of configured document types.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the taxonomy is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

type RawTable = &'static [(&'static str, &'static [(&'static str, &'static str)])];

const BUILTIN_TABLE: RawTable = &[
    (
        "letter",
        &[
            ("sender_name", "Name of the person or organization sending the letter"),
            ("recipient_name", "Name of the person or organization receiving the letter"),
            ("date", "Date the letter was written"),
            ("subject", "Subject or reference line of the letter"),
            ("salutation", "Opening greeting of the letter"),
        ],
    ),
    (
        "specification",
        &[
            ("document_title", "Title of the specification"),
            ("version_number", "Version or revision identifier"),
            ("effective_date", "Date the specification takes effect"),
            ("requirements", "List of requirements stated in the specification"),
            ("compliance_standards", "List of standards the specification references"),
        ],
    ),
    (
        "handwritten",
        &[
            ("author_name", "Name of the person who wrote the document"),
            ("date_written", "Date the document was written"),
            ("document_type", "Kind of handwritten document (note, letter, form)"),
            ("main_content", "Transcription of the main body"),
            ("legibility_notes", "Remarks on passages that are hard to read"),
        ],
    ),
    (
        "presentation",
        &[
            ("presentation_title", "Title of the presentation"),
            ("presenter_name", "Name of the presenter"),
            ("presentation_date", "Date the presentation was given"),
            ("slide_count", "Number of slides"),
            ("key_topics", "List of the main topics covered"),
        ],
    ),
    (
        "resume",
        &[
            ("candidate_name", "Full name of the candidate"),
            ("contact_information", "Email, phone, and address of the candidate"),
            ("work_experience", "List of previous positions with employer and period"),
            ("education", "List of degrees and institutions"),
            ("skills", "List of skills"),
        ],
    ),
    (
        "budget",
        &[
            ("budget_period", "Period the budget covers"),
            ("total_budget", "Total budgeted amount"),
            ("department_name", "Department or unit owning the budget"),
            ("line_items", "List of budget line items with amounts"),
            ("approval_status", "Approval state of the budget"),
        ],
    ),
    (
        "email",
        &[
            ("sender_email", "Email address of the sender"),
            ("recipient_emails", "List of recipient email addresses"),
            ("subject_line", "Subject line of the email"),
            ("date_sent", "Date the email was sent"),
            ("attachments", "List of attachment file names"),
        ],
    ),
    (
        "scientific_publication",
        &[
            ("title", "Title of the publication"),
            ("authors", "List of author names"),
            ("abstract", "Abstract of the publication"),
            ("keywords", "List of keywords"),
            ("doi", "Digital object identifier"),
        ],
    ),
    (
        "invoice",
        &[
            ("invoice_number", "Unique invoice identifier"),
            ("invoice_date", "Date the invoice was issued"),
            ("due_date", "Payment due date"),
            ("vendor_details", "Vendor/supplier name, address, and contact information"),
            ("total_amount", "Total amount due including taxes"),
        ],
    ),
    (
        "file_folder",
        &[
            ("folder_title", "Title or label on the folder"),
            ("date_range", "Range of dates covered by the folder contents"),
            ("file_count", "Number of files in the folder"),
            ("category", "Filing category"),
            ("reference_number", "Reference or filing code"),
        ],
    ),
    (
        "memo",
        &[
            ("to", "Recipients of the memo"),
            ("from", "Author of the memo"),
            ("date", "Date the memo was issued"),
            ("subject", "Subject of the memo"),
            ("action_items", "List of requested actions"),
        ],
    ),
    (
        "scientific_report",
        &[
            ("report_title", "Title of the report"),
            ("principal_investigator", "Name of the lead researcher"),
            ("institution", "Institution that produced the report"),
            ("report_date", "Date of the report"),
            ("key_findings", "List of the main findings"),
        ],
    ),
    (
        "form",
        &[
            ("form_title", "Title of the form"),
            ("form_number", "Form identifier"),
            ("completion_date", "Date the form was filled in"),
            ("filled_fields", "List of filled-in fields with their values"),
            ("signature_present", "Whether the form is signed"),
        ],
    ),
    (
        "advertisement",
        &[
            ("product_name", "Advertised product or service"),
            ("company_name", "Company placing the advertisement"),
            ("headline", "Main headline"),
            ("call_to_action", "What the reader is asked to do"),
            ("contact_information", "Phone, address, or website shown"),
        ],
    ),
    (
        "questionnaire",
        &[
            ("questionnaire_title", "Title of the questionnaire"),
            ("respondent_info", "Identifying details of the respondent"),
            ("completion_date", "Date the questionnaire was completed"),
            ("questions_and_answers", "List of questions with the given answers"),
            ("total_questions", "Number of questions"),
        ],
    ),
    (
        "news_article",
        &[
            ("headline", "Headline of the article"),
            ("author", "Name of the author"),
            ("publication_date", "Date the article was published"),
            ("news_source", "Publication or outlet name"),
            ("article_summary", "Short summary of the article"),
        ],
    ),
];

static BUILTIN: LazyLock<DocumentTypeConfig> = LazyLock::new(|| DocumentTypeConfig {
    entries: BUILTIN_TABLE
        .iter()
        .map(|(document_type, fields)| {
            (
                (*document_type).to_string(),
                fields
                    .iter()
                    .map(|(name, description)| FieldDescriptor::new(*name, *description))
                    .collect(),
            )
        })
        .collect(),
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_is_valid_and_ordered() {
        let builtin = DocumentTypeConfig::builtin();
        let revalidated = DocumentTypeConfig::new(builtin.entries.clone()).expect("valid");
        assert_eq!(&revalidated, builtin);
        assert_eq!(builtin.len(), 16);
        assert_eq!(builtin.document_types().next(), Some("letter"));
        assert_eq!(builtin.document_types().last(), Some("news_article"));
    }

    #[test]
    fn lookup_returns_configured_fields() {
        let fields = DocumentTypeConfig::builtin()
            .fields("invoice")
            .expect("invoice configured");
        let names: Vec<_> = fields.iter().map(|field| field.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "invoice_number",
                "invoice_date",
                "due_date",
                "vendor_details",
                "total_amount"
            ]
        );
        assert!(!DocumentTypeConfig::builtin().contains("receipt"));
    }

    #[test]
    fn duplicate_fields_are_rejected() {
        let error = DocumentTypeConfig::new(vec![(
            "memo".into(),
            vec![
                FieldDescriptor::new("to", "Recipients"),
                FieldDescriptor::new("to", "Again"),
            ],
        )])
        .expect_err("duplicate field");
        assert_eq!(
            error,
            DocumentTypeError::DuplicateField {
                document_type: "memo".into(),
                field: "to".into(),
            }
        );
    }

    #[test]
    fn duplicate_types_are_rejected() {
        let error = DocumentTypeConfig::new(vec![
            ("memo".into(), Vec::new()),
            ("memo".into(), Vec::new()),
        ])
        .expect_err("duplicate type");
        assert_eq!(error, DocumentTypeError::DuplicateType("memo".into()));
    }
}
