//! AST node shapes produced by the assembly stack (spec.md §4.8).
//!
//! This mirrors the statement/clause/expression variants of
//! `original_source/bql/ast.go` closely enough that the stack's
//! reduction operations (`stack.rs`) read the same way the original
//! grammar actions do, generalized into one recursive `Node` enum
//! instead of one Go struct per production — the runtime never touches
//! any of this; it only exists so the assembly stack has something
//! concrete to reduce into.

/// A parsed AST fragment. Leaf variants hold raw lexer output; the rest
/// mirror one grammar production each, named to match the stack
/// operation that builds them.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Identifier(String),
    Operator(String),
    NumericLiteral(i64),
    RangeUnit(String),
    SourceSinkName(String),
    SourceSinkType(String),
    SourceSinkParamKey(String),
    SourceSinkParamVal(String),
    FuncName(String),
    Relation(String),

    Select {
        projections: Box<Node>,
        from: Box<Node>,
        filter: Box<Node>,
        grouping: Box<Node>,
        having: Box<Node>,
    },
    CreateStreamAsSelect {
        relation: Box<Node>,
        projections: Box<Node>,
        from: Box<Node>,
        filter: Box<Node>,
        grouping: Box<Node>,
        having: Box<Node>,
    },
    CreateSource {
        name: Box<Node>,
        source_type: Box<Node>,
        specs: Box<Node>,
    },
    CreateSink {
        name: Box<Node>,
        sink_type: Box<Node>,
        specs: Box<Node>,
    },
    CreateStreamFromSource {
        relation: Box<Node>,
        source: Box<Node>,
    },
    CreateStreamFromSourceExt {
        relation: Box<Node>,
        source_type: Box<Node>,
        specs: Box<Node>,
    },
    InsertIntoSelect {
        sink: Box<Node>,
        select: Box<Node>,
    },

    EmitProjections {
        emitter: Box<Node>,
        projections: Box<Node>,
    },
    Projections(Vec<Node>),
    Alias {
        expr: Box<Node>,
        name: String,
    },
    WindowedFrom(Vec<Node>),
    Range {
        num: Box<Node>,
        unit: Box<Node>,
    },
    Filter(Option<Box<Node>>),
    Grouping(Vec<Node>),
    Having(Option<Box<Node>>),
    AliasWindowedRelation {
        relation: Box<Node>,
        name: String,
    },
    WindowedRelation {
        relation: Box<Node>,
        range: Box<Node>,
    },
    SourceSinkSpecs(Vec<Node>),
    SourceSinkParam {
        key: Box<Node>,
        value: Box<Node>,
    },
    BinaryOp {
        op: Box<Node>,
        left: Box<Node>,
        right: Box<Node>,
    },
    FuncApp {
        name: Box<Node>,
        args: Box<Node>,
    },
    Expressions(Vec<Node>),
}

impl Node {
    /// Short tag for panic messages when a reduction finds the wrong
    /// variant underneath it — the Rust analogue of a failed Go type
    /// assertion, which the original treats as an unrecoverable parser
    /// bug rather than a reportable error (spec.md §4.8).
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Identifier(_) => "Identifier",
            Node::Operator(_) => "Operator",
            Node::NumericLiteral(_) => "NumericLiteral",
            Node::RangeUnit(_) => "RangeUnit",
            Node::SourceSinkName(_) => "SourceSinkName",
            Node::SourceSinkType(_) => "SourceSinkType",
            Node::SourceSinkParamKey(_) => "SourceSinkParamKey",
            Node::SourceSinkParamVal(_) => "SourceSinkParamVal",
            Node::FuncName(_) => "FuncName",
            Node::Relation(_) => "Relation",
            Node::Select { .. } => "Select",
            Node::CreateStreamAsSelect { .. } => "CreateStreamAsSelect",
            Node::CreateSource { .. } => "CreateSource",
            Node::CreateSink { .. } => "CreateSink",
            Node::CreateStreamFromSource { .. } => "CreateStreamFromSource",
            Node::CreateStreamFromSourceExt { .. } => "CreateStreamFromSourceExt",
            Node::InsertIntoSelect { .. } => "InsertIntoSelect",
            Node::EmitProjections { .. } => "EmitProjections",
            Node::Projections(_) => "Projections",
            Node::Alias { .. } => "Alias",
            Node::WindowedFrom(_) => "WindowedFrom",
            Node::Range { .. } => "Range",
            Node::Filter(_) => "Filter",
            Node::Grouping(_) => "Grouping",
            Node::Having(_) => "Having",
            Node::AliasWindowedRelation { .. } => "AliasWindowedRelation",
            Node::WindowedRelation { .. } => "WindowedRelation",
            Node::SourceSinkSpecs(_) => "SourceSinkSpecs",
            Node::SourceSinkParam { .. } => "SourceSinkParam",
            Node::BinaryOp { .. } => "BinaryOp",
            Node::FuncApp { .. } => "FuncApp",
            Node::Expressions(_) => "Expressions",
        }
    }
}
