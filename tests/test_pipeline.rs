//! End-to-end pipeline runs over the in-memory store and a scripted model.

use graphqa::config::{Config, QueryConfig};
use graphqa::graph::memory::MemoryStore;
use graphqa::graph::{EdgeRecord, GraphStore, Row, Schema};
use graphqa::llm::LlmProvider;
use graphqa::llm::providers::scripted::ScriptedProvider;
use graphqa::pipeline::{ERROR_QUERY_SENTINEL, NO_QUERY_SENTINEL, NO_RESULTS_ANSWER, Pipeline};
use proptest::prelude::*;
use serde_json::json;

const NVIC_QUERY: &str = "MATCH (a:Entity)-[r:RELATION]-(b:Entity) \
WHERE toLower(a.name) CONTAINS toLower('nvic') RETURN a.name, r.type, b.name";

async fn nvic_store() -> MemoryStore {
    let mem = MemoryStore::new();
    let store = GraphStore::from(mem.clone());
    store.ensure_entity_constraint().await.unwrap();
    store
        .merge_entities(&["NVIC".to_string(), "Exception Table".to_string()])
        .await
        .unwrap();
    store
        .merge_relations(&[EdgeRecord {
            source_name: "NVIC".into(),
            target_name: "Exception Table".into(),
            relation: "uses".into(),
        }])
        .await
        .unwrap();
    mem
}

fn nvic_row() -> Row {
    let mut row = Row::new();
    row.insert("a.name".into(), json!("NVIC"));
    row.insert("r.type".into(), json!("uses"));
    row.insert("b.name".into(), json!("Exception Table"));
    row
}

fn pipeline(mem: &MemoryStore, model: &ScriptedProvider, policy: QueryConfig) -> Pipeline {
    Pipeline::new(mem.clone().into(), LlmProvider::Scripted(model.clone()), policy)
}

#[tokio::test]
async fn nvic_question_end_to_end() {
    let mem = nvic_store().await;
    mem.push_rows(vec![nvic_row()]);
    let model = ScriptedProvider::new([
        format!("```cypher\n{NVIC_QUERY}\n```"),
        "NVIC uses the Exception Table.".to_string(),
    ]);

    let outcome = pipeline(&mem, &model, QueryConfig::default())
        .run("What is NVIC related to?")
        .await;

    assert_eq!(outcome.cypher, NVIC_QUERY);
    assert_eq!(outcome.answer, "NVIC uses the Exception Table.");
    assert!(!outcome.is_error());
    assert_eq!(mem.executed(), vec![NVIC_QUERY.to_string()]);

    let prompts = model.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].content.contains("(:Entity)-[:RELATION]->(:Entity)"));
    assert!(prompts[0].content.contains("What is NVIC related to?"));
    assert!(prompts[1].content.contains("Exception Table"));
    assert!(prompts[1].content.contains("uses"));
}

#[tokio::test]
async fn zero_rows_give_fixed_answer() {
    let mem = nvic_store().await;
    let model = ScriptedProvider::new([NVIC_QUERY]);

    let outcome = pipeline(&mem, &model, QueryConfig::default())
        .run("What is NVIC related to?")
        .await;

    assert_eq!(outcome.answer, NO_RESULTS_ANSWER);
    assert!(!outcome.answer.is_empty());
    assert_eq!(outcome.cypher, NVIC_QUERY);
    assert_eq!(model.prompts().len(), 1);
}

#[tokio::test]
async fn unreachable_store_yields_hint_and_sentinel() {
    let mem = MemoryStore::unreachable("tcp connect error: Connection refused (os error 111)");
    let model = ScriptedProvider::default();

    let outcome = pipeline(&mem, &model, QueryConfig::default()).run("anything").await;

    assert_eq!(outcome.cypher, ERROR_QUERY_SENTINEL);
    assert!(outcome.answer.starts_with("ERROR: Database connection failed"));
    assert!(outcome.answer.contains("Check that the Neo4j server is running"));
    assert!(model.prompts().is_empty());
}

#[tokio::test]
async fn ask_against_closed_port_fails_with_hint() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = Config::test_default();
    config.graph.uri = format!("http://{addr}");
    let provider = LlmProvider::Scripted(ScriptedProvider::default());

    let outcome = graphqa::ask(&config, &provider, "What is NVIC related to?").await;
    assert_eq!(outcome.cypher, ERROR_QUERY_SENTINEL);
    assert!(outcome.answer.contains("Check that the Neo4j server is running"), "{}", outcome.answer);

    let v: serde_json::Value = serde_json::from_str(&outcome.to_json()).unwrap();
    assert!(v["answer"].is_string());
    assert!(v["cypher"].is_string());
}

#[tokio::test]
async fn failed_execution_surfaces_store_error_and_query() {
    let mem = nvic_store().await;
    mem.push_error("Neo.ClientError.Statement.SyntaxError: Invalid input");
    let model = ScriptedProvider::new([NVIC_QUERY]);

    let outcome = pipeline(&mem, &model, QueryConfig::default()).run("q").await;

    assert_eq!(outcome.cypher, ERROR_QUERY_SENTINEL);
    assert!(outcome.answer.contains("Neo.ClientError.Statement.SyntaxError: Invalid input"));
    assert!(outcome.answer.contains(NVIC_QUERY));
    assert_eq!(mem.executed().len(), 1);
}

#[tokio::test]
async fn repair_reports_the_query_that_ran() {
    let mem = nvic_store().await;
    mem.push_error("Neo.ClientError.Statement.SyntaxError: Invalid input 'R'");
    mem.push_rows(vec![nvic_row()]);
    let broken = "MATCH (a:Entity)-[r:RELATION]-(b:Entity RETURN a";
    let model = ScriptedProvider::new([broken, NVIC_QUERY, "NVIC uses the Exception Table."]);
    let policy = QueryConfig { repair_attempts: 1, ..QueryConfig::default() };

    let outcome = pipeline(&mem, &model, policy).run("What is NVIC related to?").await;

    assert_eq!(outcome.cypher, NVIC_QUERY);
    assert_eq!(mem.executed(), vec![broken.to_string(), NVIC_QUERY.to_string()]);
    let prompts = model.prompts();
    assert!(prompts[1].content.contains("Invalid input 'R'"));
    assert!(prompts[1].content.contains(broken));
}

#[tokio::test]
async fn default_limit_is_reported() {
    let mem = nvic_store().await;
    mem.push_rows(vec![nvic_row()]);
    let model = ScriptedProvider::new([NVIC_QUERY, "answer"]);
    let policy = QueryConfig { default_limit: Some(25), ..QueryConfig::default() };

    let outcome = pipeline(&mem, &model, policy).run("q").await;

    let expected = format!("{NVIC_QUERY} LIMIT 25");
    assert_eq!(outcome.cypher, expected);
    assert_eq!(mem.executed(), vec![expected]);
}

#[tokio::test]
async fn generation_failure_is_error_outcome() {
    let mem = nvic_store().await;
    let model = ScriptedProvider::default();
    model.push_failure("HTTP 503: upstream unavailable");

    let outcome = pipeline(&mem, &model, QueryConfig::default()).run("q").await;
    assert_eq!(outcome.cypher, ERROR_QUERY_SENTINEL);
    assert!(outcome.answer.contains("Query generation failed"));
    assert!(mem.executed().is_empty());
}

#[tokio::test]
async fn empty_generation_reports_no_query() {
    let mem = nvic_store().await;
    let model = ScriptedProvider::new([""]);

    let outcome = pipeline(&mem, &model, QueryConfig::default()).run("q").await;
    assert_eq!(outcome.cypher, NO_QUERY_SENTINEL);
    assert!(mem.executed().is_empty());
}

fn ident() -> impl Strategy<Value = String> {
    "[A-Z][a-zA-Z]{0,7}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn only_schema_vocabulary_reaches_the_store(
        labels in prop::collection::btree_set(ident(), 1..4),
        rel in ident(),
        use_foreign in any::<bool>(),
    ) {
        let labels: Vec<String> = labels.into_iter().collect();
        let mut schema = Schema::new();
        schema.add_pattern(labels[0].clone(), rel.clone(), labels[labels.len() - 1].clone());
        for l in &labels {
            schema.add_node_property(l.clone(), "name");
        }

        let label = if use_foreign { format!("q{}", labels[0]) } else { labels[0].clone() };
        let query = format!(
            "MATCH (a:{label})-[r:{rel}]-(b) WHERE toLower(a.name) CONTAINS toLower('x') RETURN b.name"
        );

        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let (outcome, executed) = runtime.block_on(async {
            let mem = MemoryStore::new().with_schema(schema.clone());
            let model = ScriptedProvider::new([query.clone()]);
            let outcome = pipeline(&mem, &model, QueryConfig::default()).run("q").await;
            (outcome, mem.executed())
        });

        if use_foreign {
            prop_assert!(executed.is_empty());
            prop_assert_eq!(outcome.cypher, ERROR_QUERY_SENTINEL);
        } else {
            prop_assert_eq!(executed, vec![query.clone()]);
            prop_assert_eq!(outcome.cypher, query);
        }
    }
}
