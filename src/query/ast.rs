//! The query language's abstract syntax tree — the product of parsing,
//! consumed (stateful, side-effecting) by `eval`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Union,
    Intersection,
    Complement,
    SymDiff,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryAst {
    Collection(String),
    Filter {
        alias: String,
        exact: bool,
        pattern: String,
    },
    Op(Box<QueryAst>, SetOp, Box<QueryAst>),
    Modifier(Box<QueryAst>, String),
}
