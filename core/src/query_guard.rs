//! Guarded execution of untrusted read-only query text.
//!
//! Gates, in order, each able to short-circuit:
//!   0. strip comments outside string literals, trim
//!   1. statement kind: must open with SELECT or WITH
//!   2. whole-word keyword blacklist
//!   3. append `LIMIT 1000` when no top-level LIMIT exists
//!   4. inject a tenant filter into the first FROM table when it is tenant
//!      scoped and no predicate already pins the tenant column to the caller
//!   5. execute under the statement timeout on a query-only connection
//!
//! Gate 4 is a textual rewrite. It narrows what a query can see but does not
//! prove isolation for unusual joins or subqueries.

use crate::{
    config::QueryGuardConfig,
    error::{QueryFailure, QueryFailureKind, ReconError, ReconResult},
    store::ReconStore,
};
use log::{debug, warn};
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Rows returned by a query that did not ask for a limit.
pub const ROW_CEILING: usize = 1000;

/// Server-side bound on one statement.
pub const STATEMENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Idle query-only connections kept for reuse.
const MAX_IDLE: usize = 4;

/// Words that end a FROM clause at its own nesting depth.
const CLAUSE_END: &[&str] = &[
    "GROUP", "ORDER", "LIMIT", "HAVING", "WINDOW", "UNION", "EXCEPT", "INTERSECT",
];

/// Words that can follow a table name but are never its alias.
const NOT_ALIAS: &[&str] = &[
    "WHERE", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "OUTER", "NATURAL", "ON",
    "USING", "GROUP", "ORDER", "LIMIT", "HAVING", "WINDOW", "UNION", "EXCEPT", "INTERSECT",
];

#[derive(Debug, Clone, Serialize)]
pub struct QuerySuccess {
    /// The text actually executed, after every rewrite.
    pub query: String,
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
    pub row_count: usize,
    pub elapsed: Duration,
}

// ── Lexing ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Word,
    Quoted,
    Literal,
    Open,
    Close,
    Semicolon,
    Other,
}

/// `depth` is the parenthesis depth the token sits at; a matching `(` and
/// `)` share the depth of their surroundings.
#[derive(Debug, Clone, Copy)]
struct Token {
    kind: TokenKind,
    start: usize,
    end: usize,
    depth: usize,
}

impl Token {
    fn text<'t>(&self, src: &'t str) -> &'t str {
        &src[self.start..self.end]
    }

    fn is_word(&self, src: &str, word: &str) -> bool {
        self.kind == TokenKind::Word && self.text(src).eq_ignore_ascii_case(word)
    }

    fn is_any_word(&self, src: &str, words: &[&str]) -> bool {
        words.iter().any(|w| self.is_word(src, w))
    }

    /// Identifier text with any quoting removed.
    fn ident<'t>(&self, src: &'t str) -> &'t str {
        match self.kind {
            TokenKind::Quoted => self
                .text(src)
                .trim_matches(|c| matches!(c, '"' | '`' | '[' | ']')),
            _ => self.text(src),
        }
    }
}

fn lex(src: &str) -> Vec<Token> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut depth = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        let kind = match c {
            b if b.is_ascii_whitespace() => {
                i += 1;
                continue;
            }
            b'\'' => {
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'\'' {
                        if bytes.get(i + 1) == Some(&b'\'') {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                i = (i + 1).min(bytes.len());
                TokenKind::Literal
            }
            b'"' | b'`' | b'[' => {
                let close = if c == b'[' { b']' } else { c };
                i += 1;
                while i < bytes.len() && bytes[i] != close {
                    i += 1;
                }
                i = (i + 1).min(bytes.len());
                TokenKind::Quoted
            }
            b if b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80 => {
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'$' || bytes[i] >= 0x80)
                {
                    i += 1;
                }
                TokenKind::Word
            }
            b'(' => {
                i += 1;
                tokens.push(Token { kind: TokenKind::Open, start, end: i, depth });
                depth += 1;
                continue;
            }
            b')' => {
                i += 1;
                depth = depth.saturating_sub(1);
                TokenKind::Close
            }
            b';' => {
                i += 1;
                TokenKind::Semicolon
            }
            _ => {
                i += 1;
                TokenKind::Other
            }
        };
        tokens.push(Token { kind, start, end: i, depth });
    }
    tokens
}

// ── Gates ──────────────────────────────────────────────────────────

/// Remove `--` and `/* */` comments that sit outside string literals.
pub fn strip_comments(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let mut chars = src.chars().peekable();
    let mut in_literal = false;

    while let Some(c) = chars.next() {
        if in_literal {
            out.push(c);
            if c == '\'' {
                in_literal = false;
            }
            continue;
        }
        match c {
            '\'' => {
                in_literal = true;
                out.push(c);
            }
            '-' if chars.peek() == Some(&'-') => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for skipped in chars.by_ref() {
                    if prev == '*' && skipped == '/' {
                        break;
                    }
                    prev = skipped;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out.trim().to_string()
}

fn check_statement_kind(src: &str, tokens: &[Token]) -> Result<(), QueryFailureKind> {
    let first = tokens.iter().find(|t| t.kind != TokenKind::Open);
    match first {
        Some(t) if t.is_any_word(src, &["SELECT", "WITH"]) => Ok(()),
        _ => Err(QueryFailureKind::ForbiddenStatement),
    }
}

fn has_top_level_limit(src: &str, tokens: &[Token]) -> bool {
    tokens.iter().any(|t| t.depth == 0 && t.is_word(src, "LIMIT"))
}

/// Append the row ceiling, keeping a trailing `;` at the very end.
fn apply_row_limit(src: &str) -> String {
    let body = src.trim_end();
    match body.strip_suffix(';') {
        Some(head) => format!("{} LIMIT {ROW_CEILING};", head.trim_end()),
        None => format!("{body} LIMIT {ROW_CEILING}"),
    }
}

fn sql_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn is_symbol(query: &str, t: Option<&Token>, symbol: &str) -> bool {
    t.is_some_and(|t| t.kind == TokenKind::Other && t.text(query) == symbol)
}

/// `col = 'lit'` or `'lit' = col`, where `col` may be qualified.
fn compared_to_literal(query: &str, tokens: &[Token], at: usize, literal: &str) -> bool {
    let is_literal =
        |t: Option<&Token>| t.is_some_and(|t| t.kind == TokenKind::Literal && t.text(query) == literal);

    let start = if at >= 2 && is_symbol(query, tokens.get(at - 1), ".") {
        at - 2
    } else {
        at
    };
    let forward = is_symbol(query, tokens.get(at + 1), "=") && is_literal(tokens.get(at + 2));
    let backward = start >= 2
        && is_symbol(query, tokens.get(start - 1), "=")
        && is_literal(tokens.get(start - 2));
    forward || backward
}

fn join_rewrite(head: &str, inserted: &str, rest: &str) -> String {
    let rest = rest.trim_start();
    if rest.is_empty() {
        format!("{} {inserted}", head.trim_end())
    } else if rest.starts_with(';') || rest.starts_with(')') {
        format!("{} {inserted}{rest}", head.trim_end())
    } else {
        format!("{} {inserted} {rest}", head.trim_end())
    }
}

// ── Executor ───────────────────────────────────────────────────────

/// Each execution checks out its own query-only connection, so one caller's
/// slow statement never queues another caller behind it.
pub struct GuardedQueryExecutor {
    location: Option<String>,
    idle: Mutex<Vec<ReconStore>>,
    forbidden: Option<Regex>,
    tenant_scoped: HashSet<String>,
    tenant_column: String,
    statement_timeout: Duration,
    executions: AtomicU64,
}

impl GuardedQueryExecutor {
    /// Takes ownership of a dedicated connection and switches it to query-only.
    /// Further connections are opened on demand from the same location; a
    /// private `:memory:` store has no location and serves one query at a time.
    pub fn new(store: ReconStore, config: &QueryGuardConfig) -> ReconResult<Self> {
        store.set_query_only()?;
        let words: Vec<String> = config
            .forbidden_keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(regex::escape)
            .collect();
        let forbidden = if words.is_empty() {
            None
        } else {
            let pattern = format!(r"(?i)\b(?:{})\b", words.join("|"));
            Some(Regex::new(&pattern).map_err(|e| {
                ReconError::InvalidRecord(format!("forbidden keyword pattern: {e}"))
            })?)
        };

        Ok(Self {
            location: store.location().map(String::from),
            idle: Mutex::new(vec![store]),
            forbidden,
            tenant_scoped: config
                .tenant_scoped_tables
                .iter()
                .map(|t| t.to_ascii_lowercase())
                .collect(),
            tenant_column: config.tenant_column.clone(),
            statement_timeout: STATEMENT_TIMEOUT,
            executions: AtomicU64::new(0),
        })
    }

    /// Tighter statement bound for batch tools and tests.
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    pub fn statement_timeout(&self) -> Duration {
        self.statement_timeout
    }

    /// Number of candidates that reached the store.
    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::SeqCst)
    }

    /// Gates 0 to 4. Returns the text that would be executed.
    pub fn prepare(&self, candidate: &str, tenant_id: &str) -> Result<String, QueryFailure> {
        let query = strip_comments(candidate);
        let tokens = lex(&query);

        check_statement_kind(&query, &tokens).map_err(|k| QueryFailure::new(k, query.as_str()))?;

        if let Some(hit) = self.forbidden.as_ref().and_then(|re| re.find(&query)) {
            let keyword = hit.as_str().to_ascii_uppercase();
            return Err(QueryFailure::new(
                QueryFailureKind::ForbiddenKeyword { keyword },
                query.as_str(),
            ));
        }

        let query = if has_top_level_limit(&query, &tokens) {
            query
        } else {
            apply_row_limit(&query)
        };

        Ok(self.apply_tenant_filter(&query, tenant_id))
    }

    fn apply_tenant_filter(&self, query: &str, tenant_id: &str) -> String {
        let tokens = lex(query);
        let Some(from_at) = tokens.iter().position(|t| t.is_word(query, "FROM")) else {
            return query.to_string();
        };
        let depth = tokens[from_at].depth;

        // Table name, possibly schema-qualified.
        let mut cursor = from_at + 1;
        let Some(mut table) = tokens
            .get(cursor)
            .filter(|t| matches!(t.kind, TokenKind::Word | TokenKind::Quoted))
            .copied()
        else {
            return query.to_string();
        };
        while let (Some(dot), Some(next)) = (tokens.get(cursor + 1), tokens.get(cursor + 2)) {
            if dot.kind == TokenKind::Other
                && dot.text(query) == "."
                && matches!(next.kind, TokenKind::Word | TokenKind::Quoted)
            {
                table = *next;
                cursor += 2;
            } else {
                break;
            }
        }
        cursor += 1;

        let table_name = table.ident(query).to_ascii_lowercase();
        if !self.tenant_scoped.contains(&table_name) {
            return query.to_string();
        }

        let mut qualifier = table.text(query);
        if let Some(t) = tokens.get(cursor) {
            if t.is_word(query, "AS") {
                if let Some(alias) = tokens.get(cursor + 1) {
                    qualifier = alias.text(query);
                }
            } else if matches!(t.kind, TokenKind::Word | TokenKind::Quoted)
                && !t.is_any_word(query, NOT_ALIAS)
            {
                qualifier = t.text(query);
            }
        }

        let mut where_tok = None;
        let mut end = query.len();
        let mut end_idx = tokens.len();
        for (i, t) in tokens.iter().enumerate().skip(cursor) {
            if t.kind == TokenKind::Close && t.depth < depth {
                end = t.start;
                end_idx = i;
                break;
            }
            if t.depth != depth {
                continue;
            }
            if t.kind == TokenKind::Semicolon || t.is_any_word(query, CLAUSE_END) {
                end = t.start;
                end_idx = i;
                break;
            }
            if where_tok.is_none() && t.is_word(query, "WHERE") {
                where_tok = Some(*t);
            }
        }

        let clause = tokens.get(cursor..end_idx).unwrap_or_default();
        if self.filters_on_tenant(query, clause, depth, tenant_id) {
            return query.to_string();
        }

        let filter = format!(
            "{qualifier}.{} = {}",
            self.tenant_column,
            sql_quote(tenant_id)
        );
        let rewritten = match where_tok {
            Some(w) => {
                let predicate = query[w.end..end].trim();
                join_rewrite(
                    &query[..w.end],
                    &format!("{filter} AND ({predicate})"),
                    &query[end..],
                )
            }
            None => join_rewrite(&query[..end], &format!("WHERE {filter}"), &query[end..]),
        };
        debug!("tenant {tenant_id}: injected filter on {table_name}");
        rewritten
    }

    fn checkout(&self) -> ReconResult<ReconStore> {
        let reused = self.idle.lock().ok().and_then(|mut idle| idle.pop());
        if let Some(store) = reused {
            return Ok(store);
        }
        let Some(location) = &self.location else {
            return Err(ReconError::InvalidRecord(
                "private in-memory store is busy with another query".into(),
            ));
        };
        let store = ReconStore::open(location)?;
        store.set_query_only()?;
        debug!("opened query connection to {location}");
        Ok(store)
    }

    fn checkin(&self, store: ReconStore) {
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < MAX_IDLE {
                idle.push(store);
            }
        }
    }

    fn is_tenant_column(&self, query: &str, t: &Token) -> bool {
        matches!(t.kind, TokenKind::Word | TokenKind::Quoted)
            && t.ident(query).eq_ignore_ascii_case(&self.tenant_column)
    }

    /// True when a WHERE or ON predicate at the FROM's depth already pins the
    /// tenant column to this caller's tenant with no top-level OR beside it.
    /// Selecting the column, joining on it or comparing it to another value
    /// does not count.
    fn filters_on_tenant(&self, query: &str, clause: &[Token], depth: usize, tenant_id: &str) -> bool {
        let literal = sql_quote(tenant_id);
        let mut in_predicate = false;
        let mut pinned = false;
        let mut widened = false;

        for (i, t) in clause.iter().enumerate() {
            if t.depth == depth && t.kind == TokenKind::Word {
                if t.is_any_word(query, NOT_ALIAS) {
                    if pinned && !widened {
                        return true;
                    }
                    in_predicate = t.is_any_word(query, &["WHERE", "ON"]);
                    pinned = false;
                    widened = false;
                    continue;
                }
                if in_predicate && t.is_word(query, "OR") {
                    widened = true;
                }
            }
            if in_predicate
                && t.depth == depth
                && self.is_tenant_column(query, t)
                && compared_to_literal(query, clause, i, &literal)
            {
                pinned = true;
            }
        }
        pinned && !widened
    }

    /// All gates, then execution. Never returns partial rows.
    pub fn execute(&self, candidate: &str, tenant_id: &str) -> Result<QuerySuccess, QueryFailure> {
        let query = self.prepare(candidate, tenant_id).map_err(|f| {
            warn!("tenant {tenant_id}: query rejected: {}", f.kind);
            f
        })?;

        let store = self.checkout().map_err(|e| {
            warn!("tenant {tenant_id}: no query connection: {e}");
            QueryFailure::new(QueryFailureKind::StoreFailure(e.to_string()), query.as_str())
        })?;
        self.executions.fetch_add(1, Ordering::SeqCst);

        let started = Instant::now();
        let outcome = store.execute_with_timeout(&query, self.statement_timeout);
        let elapsed = started.elapsed();
        self.checkin(store);

        let timed_out = QueryFailureKind::Timeout {
            after: self.statement_timeout,
        };
        let rows = match outcome {
            Ok(_) if elapsed > self.statement_timeout => {
                warn!("tenant {tenant_id}: query finished past its bound ({elapsed:?})");
                return Err(QueryFailure::new(timed_out, query));
            }
            Ok(rows) => rows,
            Err(e) if e.is_interrupted() => {
                warn!("tenant {tenant_id}: query interrupted after {elapsed:?}");
                return Err(QueryFailure::new(timed_out, query));
            }
            Err(e) => {
                warn!("tenant {tenant_id}: query failed: {e}");
                return Err(QueryFailure::new(
                    QueryFailureKind::StoreFailure(e.to_string()),
                    query,
                ));
            }
        };

        let records: Vec<serde_json::Map<String, serde_json::Value>> = rows
            .rows
            .iter()
            .map(|cells| {
                rows.columns
                    .iter()
                    .cloned()
                    .zip(cells.iter().map(|c| c.to_json()))
                    .collect()
            })
            .collect();

        debug!(
            "tenant {tenant_id}: {} rows in {elapsed:?}",
            records.len()
        );
        Ok(QuerySuccess {
            query,
            columns: rows.columns.clone(),
            row_count: records.len(),
            rows: records,
            elapsed,
        })
    }
}
