//! FHIRPath parser.
//!
//! A recursive descent parser producing [`ExpressionNode`] trees. Operator
//! precedence follows the FHIRPath grammar, from loosest to tightest:
//! `implies`, `or`/`xor`, `and`, equality, relational, `|`, `is`/`as`,
//! additive, multiplicative, unary sign, then invocation and indexing.
//!
//! A few shapes are normalized while parsing so that the translator sees
//! them directly: `where`/`select` calls become [`ConditionalNode`]s,
//! `is`/`as`/`ofType` with a type argument become type operations, bare
//! aggregate calls become aggregation nodes, and a chain of plain field
//! names collapses into one dotted identifier.
//!
//! [`ConditionalNode`]: crate::ast::ConditionalNode

mod lexer;

use crate::ast::{
    AggregateFunction, ConditionalKind, ExpressionNode, LiteralType, OperatorType,
    TypeOperationKind,
};
use crate::error::{Result, TranslationError};

use lexer::{Lexer, Spanned, Token};

/// Parse FHIRPath source text into an expression tree.
pub fn parse(source: &str) -> Result<ExpressionNode> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser { tokens, index: 0 };
    let expression = parser.parse_expression()?;
    match parser.current() {
        Token::Eof => Ok(expression),
        token => Err(parser.error(format!("unexpected {token:?} after expression"))),
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    index: usize,
}

impl Parser {
    fn current(&self) -> &Token {
        self.tokens
            .get(self.index)
            .map(|s| &s.token)
            .unwrap_or(&Token::Eof)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.index)
            .or_else(|| self.tokens.last())
            .map(|s| s.position)
            .unwrap_or(0)
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.index < self.tokens.len() {
            self.index += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> TranslationError {
        TranslationError::parse(self.position(), message)
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        if *self.current() == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected {expected:?}, found {:?}", self.current())))
        }
    }

    /// Check if the current token is the keyword `word`.
    fn at_keyword(&self, word: &str) -> bool {
        matches!(self.current(), Token::Identifier(name) if name == word)
    }

    fn at_symbol(&self, symbols: &[&str]) -> Option<&'static str> {
        match self.current() {
            Token::Symbol(symbol) if symbols.contains(symbol) => Some(*symbol),
            _ => None,
        }
    }

    fn at_keyword_of(&self, words: &[&'static str]) -> Option<&'static str> {
        words.iter().copied().find(|word| self.at_keyword(word))
    }

    // ------------------------------------------------------------------------
    // Binary levels
    // ------------------------------------------------------------------------

    fn parse_expression(&mut self) -> Result<ExpressionNode> {
        self.parse_implies()
    }

    fn parse_implies(&mut self) -> Result<ExpressionNode> {
        let mut left = self.parse_or()?;
        while self.at_keyword("implies") {
            self.advance();
            let right = self.parse_or()?;
            left = binary("implies", OperatorType::Logical, left, right);
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<ExpressionNode> {
        let mut left = self.parse_and()?;
        while let Some(op) = self.at_keyword_of(&["or", "xor"]) {
            self.advance();
            let right = self.parse_and()?;
            left = binary(op, OperatorType::Logical, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<ExpressionNode> {
        let mut left = self.parse_equality()?;
        while self.at_keyword("and") {
            self.advance();
            let right = self.parse_equality()?;
            left = binary("and", OperatorType::Logical, left, right);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<ExpressionNode> {
        let mut left = self.parse_relational()?;
        while let Some(op) = self.at_symbol(&["=", "!=", "~", "!~"]) {
            self.advance();
            let right = self.parse_relational()?;
            left = binary(op, OperatorType::Comparison, left, right);
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<ExpressionNode> {
        let mut left = self.parse_union()?;
        while let Some(op) = self.at_symbol(&["<", ">", "<=", ">="]) {
            self.advance();
            let right = self.parse_union()?;
            left = binary(op, OperatorType::Comparison, left, right);
        }
        Ok(left)
    }

    fn parse_union(&mut self) -> Result<ExpressionNode> {
        let mut left = self.parse_type()?;
        while self.at_symbol(&["|"]).is_some() {
            self.advance();
            let right = self.parse_type()?;
            left = binary("|", OperatorType::Binary, left, right);
        }
        Ok(left)
    }

    fn parse_type(&mut self) -> Result<ExpressionNode> {
        let mut left = self.parse_additive()?;
        while let Some(op) = self.at_keyword_of(&["is", "as"]) {
            self.advance();
            let type_name = self.parse_type_specifier()?;
            let operation = if op == "is" {
                TypeOperationKind::Is
            } else {
                TypeOperationKind::As
            };
            left = ExpressionNode::type_operation(operation, type_name, vec![left]);
        }
        Ok(left)
    }

    /// Qualified type name (`Quantity`, `FHIR.Quantity`, `System.String`).
    fn parse_type_specifier(&mut self) -> Result<String> {
        let mut name = self.parse_name()?;
        while *self.current() == Token::Dot {
            self.advance();
            name.push('.');
            name.push_str(&self.parse_name()?);
        }
        Ok(name)
    }

    fn parse_name(&mut self) -> Result<String> {
        match self.advance() {
            Token::Identifier(name) | Token::Delimited(name) => Ok(name),
            token => Err(self.error(format!("expected a name, found {token:?}"))),
        }
    }

    fn parse_additive(&mut self) -> Result<ExpressionNode> {
        let mut left = self.parse_multiplicative()?;
        while let Some(op) = self.at_symbol(&["+", "-", "&"]) {
            self.advance();
            let right = self.parse_multiplicative()?;
            left = binary(op, OperatorType::Binary, left, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<ExpressionNode> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.at_symbol(&["*", "/"]) {
                Some(op) => op,
                None => match self.at_keyword_of(&["div", "mod"]) {
                    Some(op) => op,
                    None => return Ok(left),
                },
            };
            self.advance();
            let right = self.parse_unary()?;
            left = binary(op, OperatorType::Binary, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<ExpressionNode> {
        if let Some(op) = self.at_symbol(&["+", "-"]) {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(ExpressionNode::operator(op, OperatorType::Unary, vec![operand]));
        }
        self.parse_invocation()
    }

    // ------------------------------------------------------------------------
    // Terms and invocation chains
    // ------------------------------------------------------------------------

    fn parse_invocation(&mut self) -> Result<ExpressionNode> {
        let mut expression = self.parse_term()?;
        loop {
            match self.current() {
                Token::Dot => {
                    self.advance();
                    let name = self.parse_name()?;
                    if *self.current() == Token::LParen {
                        let arguments = self.parse_arguments()?;
                        expression = call(name, arguments, Some(expression));
                    } else {
                        expression = navigate(expression, &name);
                    }
                }
                Token::LBracket => {
                    self.advance();
                    let index = match self.advance() {
                        Token::Integer(index) => index,
                        token => {
                            return Err(self.error(format!(
                                "only integer indexers are supported, found {token:?}"
                            )));
                        }
                    };
                    self.expect(Token::RBracket)?;
                    expression = index_into(expression, &index);
                }
                _ => return Ok(expression),
            }
        }
    }

    fn parse_term(&mut self) -> Result<ExpressionNode> {
        let position = self.position();
        match self.advance() {
            Token::String(value) => Ok(ExpressionNode::string(value)),
            Token::Integer(value) => Ok(ExpressionNode::literal(value, LiteralType::Integer)),
            Token::Decimal(value) => Ok(ExpressionNode::literal(value, LiteralType::Decimal)),
            Token::Date(value) => Ok(ExpressionNode::literal(value, LiteralType::Date)),
            Token::DateTime(value) => Ok(ExpressionNode::literal(value, LiteralType::DateTime)),
            Token::Time(value) => Ok(ExpressionNode::literal(value, LiteralType::Time)),
            Token::LBrace => {
                self.expect(Token::RBrace)?;
                Ok(ExpressionNode::literal("", LiteralType::Null))
            }
            Token::LParen => {
                let inner = self.parse_expression()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::Variable(name) => Ok(ExpressionNode::identifier(name)),
            Token::Identifier(name) if name == "true" || name == "false" => {
                Ok(ExpressionNode::boolean(name == "true"))
            }
            Token::Identifier(name) | Token::Delimited(name) => {
                if *self.current() == Token::LParen {
                    let arguments = self.parse_arguments()?;
                    Ok(call(name, arguments, None))
                } else {
                    Ok(ExpressionNode::identifier(name))
                }
            }
            token => Err(TranslationError::parse(
                position,
                format!("unexpected {token:?}"),
            )),
        }
    }

    fn parse_arguments(&mut self) -> Result<Vec<ExpressionNode>> {
        self.expect(Token::LParen)?;
        let mut arguments = Vec::new();
        if *self.current() == Token::RParen {
            self.advance();
            return Ok(arguments);
        }
        loop {
            arguments.push(self.parse_expression()?);
            match self.advance() {
                Token::Comma => continue,
                Token::RParen => return Ok(arguments),
                token => {
                    return Err(self.error(format!("expected ',' or ')', found {token:?}")));
                }
            }
        }
    }
}

fn binary(
    symbol: &str,
    operator_type: OperatorType,
    left: ExpressionNode,
    right: ExpressionNode,
) -> ExpressionNode {
    ExpressionNode::operator(symbol, operator_type, vec![left, right])
}

/// `expression.name`: extend a plain identifier, otherwise a path step.
fn navigate(expression: ExpressionNode, name: &str) -> ExpressionNode {
    match expression {
        ExpressionNode::Identifier(mut id) if id.metadata.is_none() => {
            id.name.push('.');
            id.name.push_str(name);
            ExpressionNode::Identifier(id)
        }
        other => other.child(ExpressionNode::identifier(name)),
    }
}

/// `expression[index]`.
fn index_into(expression: ExpressionNode, index: &str) -> ExpressionNode {
    match expression {
        ExpressionNode::Identifier(mut id) => {
            id.name.push_str(&format!("[{index}]"));
            ExpressionNode::Identifier(id)
        }
        other => other.child(ExpressionNode::identifier(format!("[{index}]"))),
    }
}

/// Build a call node, normalizing the shapes the translator handles natively.
fn call(
    name: String,
    arguments: Vec<ExpressionNode>,
    target: Option<ExpressionNode>,
) -> ExpressionNode {
    let kind = match name.as_str() {
        "where" => Some(ConditionalKind::Where),
        "select" => Some(ConditionalKind::Select),
        _ => None,
    };
    if let (Some(kind), 1) = (kind, arguments.len()) {
        let children = target.into_iter().chain(arguments).collect();
        return ExpressionNode::conditional(kind, children);
    }

    let operation = match name.as_str() {
        "is" => Some(TypeOperationKind::Is),
        "as" => Some(TypeOperationKind::As),
        "ofType" => Some(TypeOperationKind::OfType),
        _ => None,
    };
    if let (Some(operation), [ExpressionNode::Identifier(type_name)]) =
        (operation, arguments.as_slice())
    {
        let type_name = type_name.name.clone();
        return ExpressionNode::type_operation(operation, type_name, target.into_iter().collect());
    }

    match (target, name.parse::<AggregateFunction>()) {
        (None, Ok(function)) if arguments.is_empty() => ExpressionNode::aggregation(function),
        (Some(target), _) => target.invoke(name, arguments),
        (None, _) => ExpressionNode::function(name, arguments),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn id(name: &str) -> ExpressionNode {
        ExpressionNode::identifier(name)
    }

    #[test]
    fn test_dotted_path_collapses() {
        assert_eq!(parse("Patient.name.family").unwrap(), id("Patient.name.family"));
        assert_eq!(parse("%resource.id").unwrap(), id("%resource.id"));
    }

    #[test]
    fn test_where_becomes_conditional() {
        let ast = parse("name.where(use = 'official').family").unwrap();
        let expected = ExpressionNode::conditional(
            ConditionalKind::Where,
            vec![
                id("name"),
                ExpressionNode::comparison("=", id("use"), ExpressionNode::string("official")),
            ],
        )
        .child(id("family"));
        assert_eq!(ast, expected);
    }

    #[test]
    fn test_function_chain() {
        let ast = parse("name.given.first()").unwrap();
        assert_eq!(ast, id("name.given").invoke("first", vec![]));

        let ast = parse("telecom.exists(system = 'phone')").unwrap();
        assert_eq!(
            ast,
            id("telecom").invoke(
                "exists",
                vec![ExpressionNode::comparison(
                    "=",
                    id("system"),
                    ExpressionNode::string("phone")
                )]
            )
        );
    }

    #[test]
    fn test_type_operations() {
        let ast = parse("value.ofType(Quantity).value").unwrap();
        let expected =
            ExpressionNode::type_operation(TypeOperationKind::OfType, "Quantity", vec![id("value")])
                .child(id("value"));
        assert_eq!(ast, expected);

        let ast = parse("value is FHIR.Quantity").unwrap();
        assert_eq!(
            ast,
            ExpressionNode::type_operation(TypeOperationKind::Is, "FHIR.Quantity", vec![id("value")])
        );
    }

    #[test]
    fn test_bare_aggregate() {
        assert_eq!(
            parse("count()").unwrap(),
            ExpressionNode::aggregation(AggregateFunction::Count)
        );
        assert_eq!(parse("name.count()").unwrap(), id("name").invoke("count", vec![]));
    }

    #[test]
    fn test_precedence() {
        let ast = parse("a = 1 or b and c implies d").unwrap();
        let expected = binary(
            "implies",
            OperatorType::Logical,
            binary(
                "or",
                OperatorType::Logical,
                ExpressionNode::comparison("=", id("a"), ExpressionNode::integer(1)),
                binary("and", OperatorType::Logical, id("b"), id("c")),
            ),
            id("d"),
        );
        assert_eq!(ast, expected);

        let ast = parse("1 + 2 * 3").unwrap();
        let expected = binary(
            "+",
            OperatorType::Binary,
            ExpressionNode::integer(1),
            binary(
                "*",
                OperatorType::Binary,
                ExpressionNode::integer(2),
                ExpressionNode::integer(3),
            ),
        );
        assert_eq!(ast, expected);
    }

    #[test]
    fn test_unary_minus_and_literals() {
        assert_eq!(
            parse("-5").unwrap(),
            ExpressionNode::operator("-", OperatorType::Unary, vec![ExpressionNode::integer(5)])
        );
        assert_eq!(parse("true").unwrap(), ExpressionNode::boolean(true));
        assert_eq!(
            parse("@2024-01-01").unwrap(),
            ExpressionNode::literal("2024-01-01", LiteralType::Date)
        );
        assert_eq!(parse("{}").unwrap(), ExpressionNode::literal("", LiteralType::Null));
    }

    #[test]
    fn test_indexer() {
        assert_eq!(parse("name[0].family").unwrap(), id("name[0].family"));
    }

    #[test]
    fn test_delimited_identifier() {
        assert_eq!(parse("`div`.value").unwrap(), id("div.value"));
    }

    #[test]
    fn test_trailing_tokens_are_rejected() {
        let err = parse("name family").unwrap_err();
        assert!(matches!(err, TranslationError::Parse { position: 5, .. }));
        assert!(parse("name.where(").is_err());
        assert!(parse("name[first()]").is_err());
    }
}
