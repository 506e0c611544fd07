//! Tantivy schema for indexed documents.
//!
//! Text fields are analyzed with the English stemming analyzer so that
//! "running" matches "run". Identifier fields use a whitespace tokenizer with
//! lowercasing only, so codes like `ABC-123.v2` stay whole.

use tantivy::schema::{
    Field, IndexRecordOption, NumericOptions, Schema, TextFieldIndexing, TextOptions, FAST,
    STORED, STRING,
};
use tantivy::tokenizer::{LowerCaser, TextAnalyzer, WhitespaceTokenizer};
use tantivy::Index;

use crate::error::IndexError;

/// Analyzer used by every stemmed text field.
pub const STEMMED_TOKENIZER: &str = "en_stem";
/// Analyzer for the identifier fields.
pub const IDENTIFIER_TOKENIZER: &str = "identifier";

/// Query-time boosts per field.
pub mod boost {
    pub const BODY: f32 = 1.0;
    pub const TITLE: f32 = 2.0;
    pub const KEYWORDS_LOW: f32 = 1.0;
    pub const KEYWORDS_MEDIUM: f32 = 2.0;
    pub const KEYWORDS_HIGH: f32 = 4.0;
    pub const IDENTIFIERS_LOW: f32 = 1.5;
    pub const IDENTIFIERS_MEDIUM: f32 = 3.0;
    pub const IDENTIFIERS_HIGH: f32 = 6.0;
    /// Applied to the category clause when no category filter is set.
    pub const CATEGORIES: f32 = 3.0;
}

/// Schema field handles.
#[derive(Debug, Clone)]
pub struct DocumentSchema {
    schema: Schema,
    /// Unique document id, the delete key for upserts (STRING | STORED)
    pub id: Field,
    /// Owning container id (STRING | STORED)
    pub container: Field,
    /// Encoded security context (STRING | STORED | FAST)
    pub security_context: Field,
    /// Category labels, lowercased (STRING | STORED, multi-valued)
    pub categories: Field,
    pub title: Field,
    pub body: Field,
    /// Display summary, stored only
    pub summary: Field,
    /// Display URL, stored only
    pub url: Field,
    pub keywords_low: Field,
    pub keywords_medium: Field,
    pub keywords_high: Field,
    pub identifiers_low: Field,
    pub identifiers_medium: Field,
    pub identifiers_high: Field,
    /// Last modification time in epoch milliseconds (INDEXED | STORED | FAST)
    pub modified: Field,
}

const FIELD_NAMES: [&str; 15] = [
    "id",
    "container",
    "security_context",
    "categories",
    "title",
    "body",
    "summary",
    "url",
    "keywords_lo",
    "keywords_med",
    "keywords_hi",
    "identifiers_lo",
    "identifiers_med",
    "identifiers_hi",
    "modified",
];

impl DocumentSchema {
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Resolve field handles from an existing index schema.
    pub fn from_schema(schema: Schema) -> Result<Self, IndexError> {
        let mut fields = Vec::with_capacity(FIELD_NAMES.len());
        for name in FIELD_NAMES {
            let field = schema
                .get_field(name)
                .map_err(|_| IndexError::SchemaMismatch(format!("missing {name} field")))?;
            fields.push(field);
        }

        Ok(Self {
            schema,
            id: fields[0],
            container: fields[1],
            security_context: fields[2],
            categories: fields[3],
            title: fields[4],
            body: fields[5],
            summary: fields[6],
            url: fields[7],
            keywords_low: fields[8],
            keywords_medium: fields[9],
            keywords_high: fields[10],
            identifiers_low: fields[11],
            identifiers_medium: fields[12],
            identifiers_high: fields[13],
            modified: fields[14],
        })
    }

    /// Fields searched by a free-text query, with their boosts.
    pub fn default_fields(&self) -> [(Field, f32); 8] {
        [
            (self.body, boost::BODY),
            (self.title, boost::TITLE),
            (self.keywords_low, boost::KEYWORDS_LOW),
            (self.keywords_medium, boost::KEYWORDS_MEDIUM),
            (self.keywords_high, boost::KEYWORDS_HIGH),
            (self.identifiers_low, boost::IDENTIFIERS_LOW),
            (self.identifiers_medium, boost::IDENTIFIERS_MEDIUM),
            (self.identifiers_high, boost::IDENTIFIERS_HIGH),
        ]
    }
}

fn text_options(tokenizer: &str, stored: bool) -> TextOptions {
    let indexing = TextFieldIndexing::default()
        .set_tokenizer(tokenizer)
        .set_index_option(IndexRecordOption::WithFreqsAndPositions);
    let options = TextOptions::default().set_indexing_options(indexing);
    if stored {
        options.set_stored()
    } else {
        options
    }
}

/// Build the document schema.
pub fn build_document_schema() -> DocumentSchema {
    let mut builder = Schema::builder();

    let id = builder.add_text_field("id", STRING | STORED);
    let container = builder.add_text_field("container", STRING | STORED);
    let security_context = builder.add_text_field("security_context", STRING | STORED | FAST);
    let categories = builder.add_text_field("categories", STRING | STORED);
    let title = builder.add_text_field("title", text_options(STEMMED_TOKENIZER, true));
    let body = builder.add_text_field("body", text_options(STEMMED_TOKENIZER, false));
    let summary = builder.add_text_field("summary", STORED);
    let url = builder.add_text_field("url", STORED);
    let keywords_low = builder.add_text_field("keywords_lo", text_options(STEMMED_TOKENIZER, false));
    let keywords_medium =
        builder.add_text_field("keywords_med", text_options(STEMMED_TOKENIZER, false));
    let keywords_high = builder.add_text_field("keywords_hi", text_options(STEMMED_TOKENIZER, false));
    let identifiers_low =
        builder.add_text_field("identifiers_lo", text_options(IDENTIFIER_TOKENIZER, false));
    let identifiers_medium =
        builder.add_text_field("identifiers_med", text_options(IDENTIFIER_TOKENIZER, false));
    let identifiers_high =
        builder.add_text_field("identifiers_hi", text_options(IDENTIFIER_TOKENIZER, false));
    let modified = builder.add_i64_field(
        "modified",
        NumericOptions::default()
            .set_indexed()
            .set_stored()
            .set_fast(),
    );

    DocumentSchema {
        schema: builder.build(),
        id,
        container,
        security_context,
        categories,
        title,
        body,
        summary,
        url,
        keywords_low,
        keywords_medium,
        keywords_high,
        identifiers_low,
        identifiers_medium,
        identifiers_high,
        modified,
    }
}

/// Register the custom analyzers on an index. Tokenizers are not persisted,
/// so this runs every time an index is opened.
pub fn register_tokenizers(index: &Index) {
    let identifier = TextAnalyzer::builder(WhitespaceTokenizer::default())
        .filter(LowerCaser)
        .build();
    index.tokenizers().register(IDENTIFIER_TOKENIZER, identifier);
}
