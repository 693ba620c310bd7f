//! In-process [`Store`] that evaluates the same filter grammar over JSON rows.
//!
//! Mirrors the unique constraints and server-side functions declared in
//! `migrations/0001_core.sql`, records every call it receives, and can be
//! slowed down or failed per table.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, json};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::filter::unquote;
use super::{Condition, Direction, Filter, Op, Operand, Order, Query, Row, Store, StoreError};
use super::{rpc, tables};
use crate::trending;
use crate::utils::time::parse_timestamp;

/// One observed call, for asserting query fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    pub op: &'static str,
    pub table: String,
}

pub struct MemoryStore {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    unique: HashMap<&'static str, Vec<&'static [&'static str]>>,
    calls: Mutex<Vec<StoreCall>>,
    latency: Mutex<HashMap<String, Duration>>,
    failing: Mutex<HashSet<String>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new() -> Self {
        let mut unique: HashMap<&'static str, Vec<&'static [&'static str]>> = HashMap::new();
        unique.insert(tables::USERS, vec![&["username"]]);
        unique.insert(tables::HASHTAGS, vec![&["tag"]]);
        unique.insert(tables::ARTICLES, vec![&["post_id"], &["slug"]]);
        unique.insert(tables::ARTICLE_TAGS, vec![&["post_id", "tag"]]);
        unique.insert(tables::POLLS, vec![&["post_id"]]);
        unique.insert(tables::POLL_OPTIONS, vec![&["poll_id", "position"]]);
        unique.insert(tables::POLL_VOTES, vec![&["poll_id", "user_id", "option_index"]]);
        unique.insert(tables::POST_LIKES, vec![&["post_id", "user_id"]]);
        unique.insert(tables::SAVED_POSTS, vec![&["post_id", "user_id"]]);
        unique.insert(tables::POST_SHARES, vec![&["post_id", "user_id"]]);
        unique.insert(tables::POST_HASHTAGS, vec![&["post_id", "hashtag_id"]]);
        unique.insert(tables::POST_MENTIONS, vec![&["post_id", "mentioned_user_id"]]);
        unique.insert(tables::COMMENT_LIKES, vec![&["comment_id", "user_id"]]);
        unique.insert(tables::FOLLOWS, vec![&["follower_id", "following_id"]]);

        Self {
            tables: Mutex::new(HashMap::new()),
            unique,
            calls: Mutex::new(Vec::new()),
            latency: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Inserts rows directly, bypassing the call log and constraints.
    pub fn seed(&self, table: &str, rows: Vec<Row>) {
        let mut tables = lock(&self.tables);
        let target = tables.entry(table.to_string()).or_default();
        for row in rows {
            target.push(with_defaults(row));
        }
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        lock(&self.tables).get(table).cloned().unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        lock(&self.calls).clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Count of recorded calls matching `op` on `table`.
    pub fn call_count(&self, op: &str, table: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.op == op && c.table == table)
            .count()
    }

    pub fn set_latency(&self, table: &str, delay: Duration) {
        lock(&self.latency).insert(table.to_string(), delay);
    }

    /// Every later call touching `table` fails as if the store were down.
    pub fn fail_table(&self, table: &str) {
        lock(&self.failing).insert(table.to_string());
    }

    async fn enter(
        &self,
        op: &'static str,
        table: &str,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        lock(&self.calls).push(StoreCall {
            op,
            table: table.to_string(),
        });

        let delay = lock(&self.latency).get(table).copied();
        if let Some(delay) = delay {
            tokio::select! {
                _ = cancel.cancelled() => return Err(StoreError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        if lock(&self.failing).contains(table) {
            return Err(StoreError::Unavailable(format!("{} is unreachable", table)));
        }
        Ok(())
    }

    fn violates_unique(&self, table: &str, existing: &[Row], row: &Row) -> Option<String> {
        let mut keys: Vec<&[&str]> = vec![&["id"]];
        if let Some(extra) = self.unique.get(table) {
            keys.extend(extra.iter().copied());
        }
        keys.into_iter().find_map(|columns| {
            let clash = existing.iter().any(|other| {
                columns
                    .iter()
                    .all(|c| !row[*c].is_null() && row[*c] == other[*c])
            });
            clash.then(|| format!("{}_{}_key", table, columns.join("_")))
        })
    }

    fn find_rows(&self, table: &str, filter: &Filter) -> Vec<Row> {
        lock(&self.tables)
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| matches_filter(row, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn increment_post_counter(&self, args: &Row) -> Result<Row, StoreError> {
        let post_id = args["post_id"].as_str().unwrap_or_default().to_string();
        let counter = args["counter"].as_str().unwrap_or_default().to_string();
        let amount = args["amount"].as_i64().unwrap_or(1);

        let mut tables = lock(&self.tables);
        let post = tables
            .get_mut(tables::POSTS)
            .and_then(|rows| rows.iter_mut().find(|r| r["id"] == json!(post_id)))
            .ok_or_else(|| StoreError::Api {
                status: 404,
                code: Some("P0002".to_string()),
                message: format!("post {} not found", post_id),
            })?;
        let current = post[counter.as_str()].as_i64().unwrap_or(0);
        let next = (current + amount).max(0);
        post[counter.as_str()] = json!(next);
        Ok(json!(next))
    }

    fn increment_poll_votes(&self, args: &Row) -> Result<Row, StoreError> {
        let option_id = args["option_id"].as_str().unwrap_or_default().to_string();
        let amount = args["amount"].as_i64().unwrap_or(1);

        let mut tables = lock(&self.tables);
        let option = tables
            .get_mut(tables::POLL_OPTIONS)
            .and_then(|rows| rows.iter_mut().find(|r| r["id"] == json!(option_id)))
            .ok_or_else(|| StoreError::Api {
                status: 404,
                code: Some("P0002".to_string()),
                message: format!("poll option {} not found", option_id),
            })?;
        let next = (option["votes_count"].as_i64().unwrap_or(0) + amount).max(0);
        option["votes_count"] = json!(next);
        Ok(json!(next))
    }

    fn calculate_trending(&self, args: &Row) -> Row {
        let decay_hours = args["decay_hours"].as_f64().unwrap_or(24.0);
        let window_days = args["window_days"].as_i64().unwrap_or(7);
        let now = Utc::now();

        let mut tables = lock(&self.tables);
        let posts: HashMap<String, Row> = tables
            .get(tables::POSTS)
            .map(|rows| {
                rows.iter()
                    .filter(|p| p["deleted_at"].is_null() && p["is_published"] == json!(true))
                    .map(|p| (scalar_text(&p["id"]).unwrap_or_default(), p.clone()))
                    .collect()
            })
            .unwrap_or_default();
        let links = tables.get(tables::POST_HASHTAGS).cloned().unwrap_or_default();

        let mut published: HashMap<String, Vec<DateTime<Utc>>> = HashMap::new();
        for link in &links {
            let post_id = scalar_text(&link["post_id"]).unwrap_or_default();
            let hashtag_id = scalar_text(&link["hashtag_id"]).unwrap_or_default();
            if let Some(post) = posts.get(&post_id) {
                let at = post["published_at"]
                    .as_str()
                    .or_else(|| post["created_at"].as_str())
                    .and_then(|s| parse_timestamp(s).ok());
                if let Some(at) = at {
                    published.entry(hashtag_id).or_default().push(at);
                }
            }
        }

        let mut updated = 0;
        if let Some(hashtags) = tables.get_mut(tables::HASHTAGS) {
            for hashtag in hashtags.iter_mut() {
                let id = scalar_text(&hashtag["id"]).unwrap_or_default();
                let times = published.get(&id).cloned().unwrap_or_default();
                let score = trending::trending_score(&times, now, decay_hours, window_days);
                hashtag["trending_score"] = json!(score);
                hashtag["posts_count"] = json!(times.len());
                updated += 1;
            }
        }
        json!(updated)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn select(
        &self,
        table: &str,
        query: &Query,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>, StoreError> {
        self.enter("select", table, cancel).await?;

        let mut rows = self.find_rows(table, &query.filter);
        sort_rows(&mut rows, &query.order);

        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);
        let page: Vec<Row> = rows.into_iter().skip(offset).take(limit).collect();

        let projection = query.select.as_deref().unwrap_or("*");
        if projection == "*" {
            return Ok(page);
        }
        let tables = lock(&self.tables);
        Ok(page
            .iter()
            .map(|row| project(row, projection, &tables))
            .collect())
    }

    async fn count(
        &self,
        table: &str,
        filter: &Filter,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError> {
        self.enter("count", table, cancel).await?;
        Ok(self.find_rows(table, filter).len() as u64)
    }

    async fn insert(
        &self,
        table: &str,
        row: Row,
        return_representation: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>, StoreError> {
        self.enter("insert", table, cancel).await?;

        let incoming = match row {
            Row::Array(rows) => rows,
            single => vec![single],
        };

        let mut tables = lock(&self.tables);
        let target = tables.entry(table.to_string()).or_default();
        let mut staged: Vec<Row> = Vec::new();
        for row in incoming {
            let row = with_defaults(row);
            let mut seen = target.clone();
            seen.extend(staged.iter().cloned());
            if let Some(constraint) = self.violates_unique(table, &seen, &row) {
                return Err(StoreError::Api {
                    status: 409,
                    code: Some("23505".to_string()),
                    message: format!(
                        "duplicate key value violates unique constraint \"{}\"",
                        constraint
                    ),
                });
            }
            staged.push(row);
        }
        target.extend(staged.iter().cloned());

        Ok(if return_representation {
            staged
        } else {
            Vec::new()
        })
    }

    async fn patch(
        &self,
        table: &str,
        filter: &Filter,
        updates: Row,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>, StoreError> {
        self.enter("patch", table, cancel).await?;

        let mut tables = lock(&self.tables);
        let mut changed = Vec::new();
        if let (Some(rows), Row::Object(fields)) = (tables.get_mut(table), &updates) {
            for row in rows.iter_mut().filter(|r| matches_filter(r, filter)) {
                for (key, value) in fields {
                    row[key.as_str()] = value.clone();
                }
                changed.push(row.clone());
            }
        }
        Ok(changed)
    }

    async fn delete(
        &self,
        table: &str,
        filter: &Filter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>, StoreError> {
        self.enter("delete", table, cancel).await?;

        let mut tables = lock(&self.tables);
        let mut removed = Vec::new();
        if let Some(rows) = tables.get_mut(table) {
            let (gone, kept): (Vec<Row>, Vec<Row>) =
                rows.drain(..).partition(|r| matches_filter(r, filter));
            *rows = kept;
            removed = gone;
        }
        Ok(removed)
    }

    async fn rpc(
        &self,
        name: &str,
        args: Row,
        cancel: &CancellationToken,
    ) -> Result<Row, StoreError> {
        self.enter("rpc", name, cancel).await?;

        match name {
            rpc::INCREMENT_POST_COUNTER => self.increment_post_counter(&args),
            rpc::INCREMENT_POLL_VOTES => self.increment_poll_votes(&args),
            rpc::CALCULATE_TRENDING => Ok(self.calculate_trending(&args)),
            rpc::QUEUE_EMAIL_DIGESTS => Ok(json!(0)),
            other => Err(StoreError::Api {
                status: 404,
                code: Some("PGRST202".to_string()),
                message: format!("could not find the function {}", other),
            }),
        }
    }
}

/// Column defaults the schema would fill in.
fn with_defaults(row: Row) -> Row {
    let mut row = match row {
        Row::Object(map) => map,
        _ => Map::new(),
    };
    row.entry("id")
        .or_insert_with(|| json!(Uuid::new_v4().to_string()));
    // Zone-less with fractional seconds, like the remote store emits.
    row.entry("created_at")
        .or_insert_with(|| json!(Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()));
    Row::Object(row)
}

fn scalar_text(value: &Row) -> Option<String> {
    match value {
        Row::String(s) => Some(s.clone()),
        Row::Number(n) => Some(n.to_string()),
        Row::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn compare_to_text(value: &Row, text: &str) -> Option<Ordering> {
    match value {
        Row::Number(n) => {
            let left = n.as_f64()?;
            let right = text.parse::<f64>().ok()?;
            left.partial_cmp(&right)
        }
        Row::String(s) => match (parse_timestamp(s), parse_timestamp(text)) {
            (Ok(left), Ok(right)) => Some(left.cmp(&right)),
            _ => Some(s.as_str().cmp(text)),
        },
        Row::Bool(b) => text.parse::<bool>().ok().map(|t| b.cmp(&t)),
        _ => None,
    }
}

fn like(value: &str, pattern: &str) -> bool {
    fn walk(v: &[char], p: &[char]) -> bool {
        match p.split_first() {
            None => v.is_empty(),
            Some(('%' | '*', rest)) => (0..=v.len()).any(|i| walk(&v[i..], rest)),
            Some(('_', rest)) => !v.is_empty() && walk(&v[1..], rest),
            Some((c, rest)) => v.first() == Some(c) && walk(&v[1..], rest),
        }
    }
    let v: Vec<char> = value.to_lowercase().chars().collect();
    let p: Vec<char> = pattern.to_lowercase().chars().collect();
    walk(&v, &p)
}

fn matches_condition(row: &Row, condition: &Condition) -> bool {
    match condition {
        Condition::Or(any) => any.iter().any(|c| matches_condition(row, c)),
        Condition::Field { field, op, operand } => {
            let value = &row[field.as_str()];
            match (op, operand) {
                (Op::Is, Operand::Null) => value.is_null(),
                (Op::Is, Operand::Bool(b)) => value == &json!(b),
                (Op::In, Operand::List(items)) => items
                    .iter()
                    .any(|item| compare_to_text(value, &unquote(item)) == Some(Ordering::Equal)),
                (Op::ILike, Operand::Text(pattern)) => {
                    value.as_str().is_some_and(|s| like(s, pattern))
                }
                (Op::Eq, Operand::Text(text)) => {
                    compare_to_text(value, text) == Some(Ordering::Equal)
                }
                (Op::Lt, Operand::Text(text)) => {
                    compare_to_text(value, text) == Some(Ordering::Less)
                }
                (Op::Lte, Operand::Text(text)) => matches!(
                    compare_to_text(value, text),
                    Some(Ordering::Less | Ordering::Equal)
                ),
                (Op::Gt, Operand::Text(text)) => {
                    compare_to_text(value, text) == Some(Ordering::Greater)
                }
                (Op::Gte, Operand::Text(text)) => matches!(
                    compare_to_text(value, text),
                    Some(Ordering::Greater | Ordering::Equal)
                ),
                _ => false,
            }
        }
    }
}

fn matches_filter(row: &Row, filter: &Filter) -> bool {
    filter.conditions.iter().all(|c| matches_condition(row, c))
}

fn compare_values(a: &Row, b: &Row) -> Ordering {
    match (a, b) {
        (Row::Number(x), Row::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Row::String(x), Row::String(y)) => match (parse_timestamp(x), parse_timestamp(y)) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => x.cmp(y),
        },
        (Row::Bool(x), Row::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

/// Postgres defaults: NULLS LAST ascending, NULLS FIRST descending.
fn sort_rows(rows: &mut [Row], order: &[Order]) {
    rows.sort_by(|a, b| {
        for o in order {
            let (x, y) = (&a[o.field.as_str()], &b[o.field.as_str()]);
            let ordering = match (x.is_null(), y.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => compare_values(x, y),
            };
            let ordering = match o.direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// Splits on commas that are not inside parentheses.
fn split_top_level(projection: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let (mut depth, mut start) = (0usize, 0usize);
    for (i, c) in projection.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(projection[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(projection[start..].trim());
    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

/// Applies `col`, `*` and `alias:table!fk(cols)` items to one row.
fn project(row: &Row, projection: &str, tables: &HashMap<String, Vec<Row>>) -> Row {
    let mut out = Map::new();
    for item in split_top_level(projection) {
        if item == "*" {
            if let Row::Object(fields) = row {
                out.extend(fields.clone());
            }
            continue;
        }

        let Some(open) = item.find('(') else {
            out.insert(item.to_string(), row[item].clone());
            continue;
        };

        let head = &item[..open];
        let inner = item[open + 1..].trim_end_matches(')');
        let (alias, target) = head.split_once(':').unwrap_or((head, head));
        let (table, fk) = target.split_once('!').unwrap_or((target, "id"));

        let embedded = tables
            .get(table)
            .and_then(|rows| {
                rows.iter()
                    .find(|candidate| !row[fk].is_null() && candidate["id"] == row[fk])
            })
            .map(|found| project(found, inner, tables))
            .unwrap_or(Row::Null);
        out.insert(alias.to_string(), embedded);
    }
    Row::Object(out)
}
