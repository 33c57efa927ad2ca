//! A reduce-style parse stack: push range-tagged components, pop a
//! fixed or range-selected group of them, and replace the group with
//! one combined component (spec.md §4.8).
//!
//! Grounded directly in `original_source/bql/parser/stack.go`'s
//! `parseStack`/`ParsedComponent`. The Go version is a hand-rolled
//! singly linked list with a counter; `Vec` already gives the same
//! push/pop-at-the-end behavior with none of the bookkeeping, so that's
//! the only structural change — every reduction (`Assemble*`) keeps the
//! same pop arity, range checks, and panic-on-bug posture as the
//! original.

use super::ast::Node;

/// One reduced (or not-yet-reduced) span of the input plus its payload.
/// `begin`/`end` are the byte offsets `[begin, end)` of the source text
/// this component was built from.
#[derive(Debug, Clone)]
pub struct ParsedComponent {
    pub begin: usize,
    pub end: usize,
    pub node: Node,
}

impl ParsedComponent {
    fn expect(self, want: &'static str) -> Node {
        if self.node.kind() != want {
            panic!("expected a {want} component on the stack, found {}", self.node.kind());
        }
        self.node
    }
}

#[derive(Debug, Default)]
pub struct ParseStack {
    items: Vec<ParsedComponent>,
}

impl ParseStack {
    pub fn new() -> Self {
        ParseStack { items: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, value: ParsedComponent) {
        self.items.push(value);
    }

    pub fn pop(&mut self) -> Option<ParsedComponent> {
        self.items.pop()
    }

    pub fn peek(&self) -> Option<&ParsedComponent> {
        self.items.last()
    }

    /// Pushes `node` wrapped in a `[begin, end)` component, enforcing
    /// the range discipline every reduction must preserve: `begin <=
    /// end`, and `begin` no smaller than the previous item's `end` so
    /// components never overlap (spec.md §3, "Parse component").
    pub fn push_component(&mut self, begin: usize, end: usize, node: Node) {
        assert!(begin <= end, "begin must be less than or equal to end");
        if let Some(top) = self.peek() {
            assert!(
                top.end <= begin,
                "begin must be greater than or equal to the previous item's end"
            );
        }
        self.push(ParsedComponent { begin, end, node });
    }

    /// Pops every component whose span lies within `[begin, end)`,
    /// restoring source order (the stack yields them innermost/latest
    /// first).
    fn collect_elements(&mut self, begin: usize, end: usize) -> Vec<Node> {
        let mut elems = Vec::new();
        while let Some(top) = self.peek() {
            if top.end <= begin {
                break;
            }
            elems.push(self.pop().unwrap().node);
        }
        elems.reverse();
        let _ = end;
        elems
    }

    fn pop2(&mut self) -> (ParsedComponent, ParsedComponent) {
        assert!(self.len() >= 2, "not enough elements on stack to pop 2 of them");
        (self.pop().unwrap(), self.pop().unwrap())
    }

    fn pop3(&mut self) -> (ParsedComponent, ParsedComponent, ParsedComponent) {
        assert!(self.len() >= 3, "not enough elements on stack to pop 3 of them");
        (self.pop().unwrap(), self.pop().unwrap(), self.pop().unwrap())
    }

    fn pop5(&mut self) -> (ParsedComponent, ParsedComponent, ParsedComponent, ParsedComponent, ParsedComponent) {
        assert!(self.len() >= 5, "not enough elements on stack to pop 5 of them");
        (
            self.pop().unwrap(),
            self.pop().unwrap(),
            self.pop().unwrap(),
            self.pop().unwrap(),
            self.pop().unwrap(),
        )
    }

    fn pop6(
        &mut self,
    ) -> (
        ParsedComponent,
        ParsedComponent,
        ParsedComponent,
        ParsedComponent,
        ParsedComponent,
        ParsedComponent,
    ) {
        assert!(self.len() >= 6, "not enough elements on stack to pop 6 of them");
        (
            self.pop().unwrap(),
            self.pop().unwrap(),
            self.pop().unwrap(),
            self.pop().unwrap(),
            self.pop().unwrap(),
            self.pop().unwrap(),
        )
    }

    /* Statement-level reductions */

    pub fn assemble_select(&mut self) {
        let (having, grouping, filter, from, projections) = self.pop5();
        let begin = projections.begin;
        let end = having.end;
        let node = Node::Select {
            projections: Box::new(projections.expect("Projections")),
            from: Box::new(from.expect("WindowedFrom")),
            filter: Box::new(filter.expect("Filter")),
            grouping: Box::new(grouping.expect("Grouping")),
            having: Box::new(having.expect("Having")),
        };
        self.push(ParsedComponent { begin, end, node });
    }

    pub fn assemble_create_stream_as_select(&mut self) {
        let (having, grouping, filter, from, projections, rel) = self.pop6();
        let begin = rel.begin;
        let end = having.end;
        let node = Node::CreateStreamAsSelect {
            relation: Box::new(rel.expect("Relation")),
            projections: Box::new(projections.expect("EmitProjections")),
            from: Box::new(from.expect("WindowedFrom")),
            filter: Box::new(filter.expect("Filter")),
            grouping: Box::new(grouping.expect("Grouping")),
            having: Box::new(having.expect("Having")),
        };
        self.push(ParsedComponent { begin, end, node });
    }

    pub fn assemble_create_source(&mut self) {
        let (specs, source_type, name) = self.pop3();
        let begin = name.begin;
        let end = specs.end;
        let node = Node::CreateSource {
            name: Box::new(name.expect("SourceSinkName")),
            source_type: Box::new(source_type.expect("SourceSinkType")),
            specs: Box::new(specs.expect("SourceSinkSpecs")),
        };
        self.push(ParsedComponent { begin, end, node });
    }

    pub fn assemble_create_sink(&mut self) {
        let (specs, sink_type, name) = self.pop3();
        let begin = name.begin;
        let end = specs.end;
        let node = Node::CreateSink {
            name: Box::new(name.expect("SourceSinkName")),
            sink_type: Box::new(sink_type.expect("SourceSinkType")),
            specs: Box::new(specs.expect("SourceSinkSpecs")),
        };
        self.push(ParsedComponent { begin, end, node });
    }

    pub fn assemble_create_stream_from_source(&mut self) {
        let (src, rel) = self.pop2();
        let begin = rel.begin;
        let end = src.end;
        let node = Node::CreateStreamFromSource {
            relation: Box::new(rel.expect("Relation")),
            source: Box::new(src.expect("SourceSinkName")),
        };
        self.push(ParsedComponent { begin, end, node });
    }

    pub fn assemble_create_stream_from_source_ext(&mut self) {
        let (specs, source_type, rel) = self.pop3();
        let begin = rel.begin;
        let end = specs.end;
        let node = Node::CreateStreamFromSourceExt {
            relation: Box::new(rel.expect("Relation")),
            source_type: Box::new(source_type.expect("SourceSinkType")),
            specs: Box::new(specs.expect("SourceSinkSpecs")),
        };
        self.push(ParsedComponent { begin, end, node });
    }

    pub fn assemble_insert_into_select(&mut self) {
        let (select, sink) = self.pop2();
        let begin = sink.begin;
        let end = select.end;
        let node = Node::InsertIntoSelect {
            sink: Box::new(sink.expect("SourceSinkName")),
            select: Box::new(select.expect("Select")),
        };
        self.push(ParsedComponent { begin, end, node });
    }

    /* Clause-level reductions */

    pub fn assemble_emit_projections(&mut self) {
        let (projections, emitter) = self.pop2();
        let begin = emitter.begin;
        let end = projections.end;
        let node = Node::EmitProjections {
            emitter: Box::new(emitter.node),
            projections: Box::new(projections.expect("Projections")),
        };
        self.push_component(begin, end, node);
    }

    pub fn assemble_projections(&mut self, begin: usize, end: usize) {
        let elems = self.collect_elements(begin, end);
        self.push_component(begin, end, Node::Projections(elems));
    }

    pub fn assemble_alias(&mut self) {
        let (name, expr) = self.pop2();
        let begin = expr.begin;
        let end = name.end;
        let name_str = match name.node {
            Node::Identifier(s) => s,
            other => panic!("expected an Identifier component, found {}", other.kind()),
        };
        self.push_component(begin, end, Node::Alias { expr: Box::new(expr.node), name: name_str });
    }

    pub fn assemble_windowed_from(&mut self, begin: usize, end: usize) {
        if begin == end {
            self.push_component(begin, end, Node::WindowedFrom(Vec::new()));
        } else {
            let elems = self.collect_elements(begin, end);
            self.push_component(begin, end, Node::WindowedFrom(elems));
        }
    }

    pub fn assemble_range(&mut self) {
        let (unit, num) = self.pop2();
        let begin = num.begin;
        let end = unit.end;
        let node = Node::Range {
            num: Box::new(num.expect("NumericLiteral")),
            unit: Box::new(unit.expect("RangeUnit")),
        };
        self.push_component(begin, end, node);
    }

    pub fn assemble_filter(&mut self, begin: usize, end: usize) {
        if begin == end {
            self.push_component(begin, end, Node::Filter(None));
            return;
        }
        let f = self.pop().expect("stack must not be empty: a Filter clause is present");
        assert!(
            begin <= f.begin && end >= f.end,
            "the item on top of the stack is not within given range"
        );
        self.push_component(begin, end, Node::Filter(Some(Box::new(f.node))));
    }

    pub fn assemble_grouping(&mut self, begin: usize, end: usize) {
        let elems = self.collect_elements(begin, end);
        self.push_component(begin, end, Node::Grouping(elems));
    }

    pub fn assemble_having(&mut self, begin: usize, end: usize) {
        if begin == end {
            self.push_component(begin, end, Node::Having(None));
            return;
        }
        let h = self.pop().expect("stack must not be empty: a Having clause is present");
        assert!(
            begin <= h.begin && end >= h.end,
            "the item on top of the stack is not within given range"
        );
        self.push_component(begin, end, Node::Having(Some(Box::new(h.node))));
    }

    pub fn assemble_alias_windowed_relation(&mut self) {
        let (name, rel) = self.pop2();
        let begin = rel.begin;
        let end = name.end;
        let name_str = match name.node {
            Node::Identifier(s) => s,
            other => panic!("expected an Identifier component, found {}", other.kind()),
        };
        self.push_component(
            begin,
            end,
            Node::AliasWindowedRelation {
                relation: Box::new(rel.expect("WindowedRelation")),
                name: name_str,
            },
        );
    }

    /// Wraps a bare `WindowedRelation` on top of the stack into an
    /// `AliasWindowedRelation` with an empty alias, or leaves an
    /// already-aliased one untouched — so later collection steps only
    /// ever have to handle one shape (spec.md §4.8).
    pub fn ensure_alias_windowed_relation(&mut self) {
        let top = self.pop().expect("stack must not be empty");
        let begin = top.begin;
        let end = top.end;
        let node = match top.node {
            already @ Node::AliasWindowedRelation { .. } => already,
            Node::WindowedRelation { relation, range } => Node::AliasWindowedRelation {
                relation: Box::new(Node::WindowedRelation { relation, range }),
                name: String::new(),
            },
            other => panic!("expected a WindowedRelation or AliasWindowedRelation, found {}", other.kind()),
        };
        self.push_component(begin, end, node);
    }

    pub fn assemble_windowed_relation(&mut self) {
        let (range, rel) = self.pop2();
        let begin = rel.begin;
        let end = range.end;
        let node = Node::WindowedRelation {
            relation: Box::new(rel.expect("Relation")),
            range: Box::new(range.expect("Range")),
        };
        self.push_component(begin, end, node);
    }

    pub fn assemble_source_sink_specs(&mut self, begin: usize, end: usize) {
        if begin == end {
            self.push_component(begin, end, Node::SourceSinkSpecs(Vec::new()));
        } else {
            let elems = self.collect_elements(begin, end);
            self.push_component(begin, end, Node::SourceSinkSpecs(elems));
        }
    }

    pub fn assemble_source_sink_param(&mut self) {
        let (value, key) = self.pop2();
        let begin = key.begin;
        let end = value.end;
        let node = Node::SourceSinkParam {
            key: Box::new(key.expect("SourceSinkParamKey")),
            value: Box::new(value.expect("SourceSinkParamVal")),
        };
        self.push_component(begin, end, node);
    }

    /* Expression-level reductions */

    pub fn assemble_binary_operation(&mut self, begin: usize, end: usize) {
        let mut elems = self.collect_elements(begin, end);
        match elems.len() {
            1 => self.push_component(begin, end, elems.pop().unwrap()),
            3 => {
                let right = elems.pop().unwrap();
                let op = elems.pop().unwrap();
                let left = elems.pop().unwrap();
                self.push_component(
                    begin,
                    end,
                    Node::BinaryOp {
                        op: Box::new(op),
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                );
            }
            n => panic!("cannot turn {n} stack elements into a binary operation"),
        }
    }

    pub fn assemble_func_app(&mut self) {
        let (exprs, func_name) = self.pop2();
        let begin = func_name.begin;
        let end = exprs.end;
        let node = Node::FuncApp {
            name: Box::new(func_name.expect("FuncName")),
            args: Box::new(exprs.expect("Expressions")),
        };
        self.push_component(begin, end, node);
    }

    pub fn assemble_expressions(&mut self, begin: usize, end: usize) {
        let elems = self.collect_elements(begin, end);
        self.push_component(begin, end, Node::Expressions(elems));
    }
}
