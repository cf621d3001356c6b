//! End-to-end translation scenarios through the public API.

use octofhir_fhirpath_sql::{
    AggregateFunction, AstToSqlTranslator, ConditionalKind, DialectKind, ExpressionNode,
    QueryAssembler, TranslationContext, TranslationError, dialect_for, parse,
};
use pretty_assertions::assert_eq;

fn postgres(resource_type: &str) -> AstToSqlTranslator {
    AstToSqlTranslator::new(dialect_for(DialectKind::Postgres), resource_type)
}

fn duckdb(resource_type: &str) -> AstToSqlTranslator {
    AstToSqlTranslator::new(dialect_for(DialectKind::DuckDb), resource_type)
}

fn official() -> ExpressionNode {
    ExpressionNode::comparison(
        "=",
        ExpressionNode::identifier("use"),
        ExpressionNode::string("official"),
    )
}

#[test]
fn test_name_family_is_plain_navigation() {
    let ast = ExpressionNode::identifier("name").child(ExpressionNode::identifier("family"));
    let fragments = postgres("Patient").translate(&ast).unwrap();

    assert_eq!(fragments.len(), 1);
    let fragment = &fragments[0];
    assert!(!fragment.requires_unnest);
    assert!(!fragment.is_aggregate);
    assert!(
        fragment.expression.contains("'$.name.family'"),
        "Expected JSON path in: {}",
        fragment.expression
    );
    assert!(fragment.dependencies.is_empty());
}

#[test]
fn test_where_is_self_contained_subquery() {
    let ast = ExpressionNode::identifier("name")
        .child(ExpressionNode::conditional(ConditionalKind::Where, vec![official()]));
    let fragments = postgres("Patient").translate(&ast).unwrap();

    assert_eq!(fragments.len(), 1);
    let fragment = &fragments[0];
    assert!(!fragment.requires_unnest);
    assert_eq!(fragment.dependencies, vec!["resource"]);
    assert!(fragment.expression.contains("'official'"), "{}", fragment.expression);
}

#[test]
fn test_select_creates_cte_stage() {
    let ast = ExpressionNode::identifier("name").child(ExpressionNode::conditional(
        ConditionalKind::Select,
        vec![ExpressionNode::identifier("family")],
    ));
    let mut translator = postgres("Patient");
    let fragments = translator.translate(&ast).unwrap();

    assert_eq!(fragments.len(), 1);
    let fragment = &fragments[0];
    assert!(fragment.requires_unnest);
    assert!(fragment.is_aggregate);
    assert_eq!(fragment.source_table, "cte_1");
    assert!(fragment.dependencies.contains(&"resource".to_string()));
    assert_eq!(translator.context().cte_counter(), 1);
}

#[test]
fn test_pathless_count_is_count_star() {
    let fragments = postgres("Patient")
        .translate(&ExpressionNode::aggregation(AggregateFunction::Count))
        .unwrap();
    assert_eq!(fragments[0].expression, "COUNT(*)");
}

#[test]
fn test_parsed_count_without_target_is_count_star() {
    let ast = parse("count()").unwrap();
    let fragments = duckdb("Patient").translate(&ast).unwrap();
    assert_eq!(fragments[0].expression, "COUNT(*)");
}

#[test]
fn test_parse_and_translate_to_sql() {
    let ast = parse("Observation.code.coding.where(system = 'http://loinc.org').code").unwrap();
    let sql = postgres("Observation").translate_to_sql(&ast).unwrap();

    assert!(sql.starts_with("SELECT resource.id AS id, "), "{}", sql);
    assert!(sql.contains("'http://loinc.org'"), "{}", sql);
    assert!(sql.contains("'$.code.coding'"), "{}", sql);
    assert!(sql.ends_with(" AS result FROM resource"), "{}", sql);
}

#[test]
fn test_select_statement_reads_cte() {
    let ast = parse("name.select(given)").unwrap();
    let mut translator = postgres("Patient");
    let query = translator.translate_to_query(&ast).unwrap();

    assert_eq!(query.ctes.len(), 1);
    assert_eq!(query.ctes[0].name, "cte_1");
    assert!(query.final_is_stage);
    let sql = query.to_sql(translator.context());
    assert!(sql.starts_with("WITH cte_1 AS (SELECT resource.id AS id, "), "{}", sql);
    assert!(sql.ends_with(" SELECT * FROM cte_1"), "{}", sql);
}

#[test]
fn test_chained_selects_assemble_in_dependency_order() {
    let ast = parse("name.select(given).select($this)").unwrap();
    let mut translator = duckdb("Patient");
    let fragments = translator.translate(&ast).unwrap();
    assert_eq!(fragments.len(), 2);

    let query = QueryAssembler::new()
        .assemble(&fragments, translator.context_mut())
        .unwrap();
    let names: Vec<_> = query.ctes.iter().map(|cte| cte.name.as_str()).collect();
    assert_eq!(names, vec!["cte_1", "cte_2"]);
    assert!(query.ctes[1].query.contains("FROM cte_1"));
}

#[test]
fn test_exists_with_criteria_and_boolean_logic() {
    let ast = parse("telecom.exists(system = 'phone') and active = true").unwrap();
    let fragments = postgres("Patient").translate(&ast).unwrap();
    let sql = &fragments[0].expression;

    assert!(sql.contains("EXISTS (SELECT 1 FROM "), "{}", sql);
    assert!(sql.contains(" AND "), "{}", sql);
    assert_eq!(fragments[0].dependencies, vec!["resource"]);
}

#[test]
fn test_type_operations() {
    let mut translator = postgres("Observation");

    let is_quantity = translator
        .translate(&parse("value is Quantity").unwrap())
        .unwrap();
    assert!(is_quantity[0].expression.contains("'$.valueQuantity'"));

    let unknown = translator
        .translate(&parse("value.ofType(FutureType)").unwrap())
        .unwrap();
    assert_eq!(unknown[0].expression, "'[]'::jsonb");
}

#[test]
fn test_extension_never_limits() {
    let ast = parse("extension('http://example.org/birthPlace').valueAddress.city").unwrap();
    for mut translator in [postgres("Patient"), duckdb("Patient")] {
        let fragments = translator.translate(&ast).unwrap();
        let sql = fragments[0].expression.to_uppercase();
        assert!(!sql.contains("LIMIT"), "{}", sql);
    }
}

#[test]
fn test_constants_resolve_through_context() {
    let context = TranslationContext::new("Observation");
    let mut translator =
        AstToSqlTranslator::with_context(dialect_for(DialectKind::Postgres), context);
    translator.context_mut().bind_constant("code", "'8867-4'");

    let fragments = translator
        .translate(&parse("code.coding.code = %code").unwrap())
        .unwrap();
    assert!(fragments[0].expression.ends_with("= '8867-4')"), "{}", fragments[0].expression);
}

#[test]
fn test_errors() {
    let mut translator = postgres("Patient");

    assert_eq!(
        translator.translate(&parse("name.frobnicate()").unwrap()).unwrap_err(),
        TranslationError::unsupported_function("frobnicate")
    );
    assert_eq!(
        translator.translate(&parse("%missing").unwrap()).unwrap_err(),
        TranslationError::undefined_reference("%missing")
    );
    assert!(matches!(
        translator.translate(&parse("name | telecom").unwrap()),
        Err(TranslationError::UnsupportedOperator(_))
    ));
    assert!(matches!(
        translator.translate_expression("name.where("),
        Err(TranslationError::Parse { .. })
    ));
}

#[test]
fn test_staged_count_beside_root_navigation() {
    let ast = parse("name.select(family).count() > 1 and active = true").unwrap();
    let mut translator = duckdb("Patient");
    let query = translator.translate_to_query(&ast).unwrap();

    assert!(!query.population);
    assert_eq!(query.source, "resource");
    assert_eq!(query.joins, vec!["cte_1"]);
    assert_eq!(query.cte_sources(), vec!["cte_1"]);

    let sql = query.to_sql(translator.context());
    assert!(!sql.contains("count(*)"), "{}", sql);
    assert!(sql.contains("json_array_length(cte_1.resource)"), "{}", sql);
    assert!(
        sql.contains("CAST(json_extract_string(resource.resource, '$.active') AS BOOLEAN)"),
        "{}",
        sql
    );
    assert!(
        sql.ends_with(" AS result FROM resource LEFT JOIN cte_1 ON cte_1.id = resource.id"),
        "{}",
        sql
    );

    let condition = query.filter_condition(translator.context());
    assert!(
        condition.starts_with(
            "resource.id IN (SELECT resource.id FROM resource LEFT JOIN cte_1 ON cte_1.id = resource.id WHERE "
        ),
        "{}",
        condition
    );
}

#[test]
fn test_operand_order_does_not_move_root_navigation() {
    for source in [
        "gender = 'male' and name.select(family).exists()",
        "name.select(family).exists() and gender = 'male'",
    ] {
        let mut translator = postgres("Patient");
        let query = translator.translate_to_query(&parse(source).unwrap()).unwrap();
        assert_eq!(query.source, "resource", "{source}");
        assert_eq!(query.joins, vec!["cte_1"], "{source}");
        assert!(
            query
                .expression
                .contains("jsonb_path_query_first(resource.resource, '$.gender')"),
            "{}",
            query.expression
        );
        assert!(!query.expression.contains("cte_1.resource, '$.gender'"), "{source}");
    }
}

#[test]
fn test_staged_comparison_reads_first_element() {
    let ast = parse("name.select(family) = 'Smith'").unwrap();
    let mut translator = duckdb("Patient");
    let query = translator.translate_to_query(&ast).unwrap();
    assert_eq!(
        query.expression,
        "(json_extract_string(cte_1.resource, '$[0]') = 'Smith')"
    );
}
