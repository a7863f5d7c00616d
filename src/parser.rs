use std::{fmt::Display, iter::Peekable, str::Chars};

use thiserror::Error;

use crate::{
    query::{Constant, Expression, Operator, Predicate, Term},
    record::Schema,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("syntax error: {message}")]
pub struct ParserError {
    message: String,
}

impl ParserError {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }

    fn expected(what: &str, found: &Option<Token>) -> Self {
        match found {
            Some(token) => Self::new(&format!("expected {what}, found {token}")),
            None => Self::new(&format!("expected {what}, found end of input")),
        }
    }
}

/// Recursive-descent parser for the SQL subset
///
/// Each statement may end with a single `;`. Anything left over after that is an error.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
}

impl<'a> Parser<'a> {
    pub fn new(sql: &'a str) -> Result<Self, ParserError> {
        Ok(Self {
            lexer: Lexer::new(sql)?,
        })
    }

    /// Parse a complete `SELECT` statement
    pub fn parse_query(mut self) -> Result<QueryData, ParserError> {
        let query = self.query()?;
        self.end()?;
        Ok(query)
    }

    /// Parse a complete statement that is not a query
    pub fn parse_update_command(mut self) -> Result<SQLStatement, ParserError> {
        let statement = self.update_command()?;
        self.end()?;
        Ok(statement)
    }

    fn end(&mut self) -> Result<(), ParserError> {
        if self.lexer.match_delim(Lexer::SEMICOLON) {
            self.lexer.eat_delim(Lexer::SEMICOLON)?;
        }
        match &self.lexer.current_token {
            None => Ok(()),
            found => Err(ParserError::expected("end of statement", found)),
        }
    }

    /// Parse a list of fields from the SQL statement
    /// Each field is just an identifier
    fn field_list(&mut self) -> Result<Vec<String>, ParserError> {
        let mut list = vec![self.lexer.eat_identifier()?];
        while self.lexer.match_delim(Lexer::COMMA) {
            self.lexer.eat_delim(Lexer::COMMA)?;
            list.push(self.lexer.eat_identifier()?);
        }
        Ok(list)
    }

    fn constant(&mut self) -> Result<Constant, ParserError> {
        if self.lexer.match_string_constant() {
            return Ok(Constant::Str(self.lexer.eat_string_constant()?));
        }
        Ok(Constant::Int(self.lexer.eat_int_constant()?))
    }

    fn constants(&mut self) -> Result<Vec<Constant>, ParserError> {
        let mut list = vec![self.constant()?];
        while self.lexer.match_delim(Lexer::COMMA) {
            self.lexer.eat_delim(Lexer::COMMA)?;
            list.push(self.constant()?);
        }
        Ok(list)
    }

    fn expression(&mut self) -> Result<Expression, ParserError> {
        if self.lexer.match_identifier() {
            return Ok(Expression::Field(self.lexer.eat_identifier()?));
        }
        Ok(Expression::Constant(self.constant()?))
    }

    fn term(&mut self) -> Result<Term, ParserError> {
        let lhs = self.expression()?;
        let op = match self.lexer.current_token {
            Some(Token::Delimiter(Lexer::EQUAL)) => Operator::Equal,
            Some(Token::Delimiter(Lexer::GREATER)) => Operator::GreaterThan,
            Some(Token::Delimiter(Lexer::LESS)) => Operator::LessThan,
            ref found => return Err(ParserError::expected("a comparison", found)),
        };
        self.lexer.next_token()?;
        let rhs = self.expression()?;
        Ok(Term::new(lhs, op, rhs))
    }

    fn predicate(&mut self) -> Result<Predicate, ParserError> {
        let mut terms = vec![self.term()?];
        while self.lexer.match_keyword("and") {
            self.lexer.eat_keyword("and")?;
            terms.push(self.term()?);
        }
        Ok(Predicate::from_terms(terms))
    }

    fn optional_where(&mut self) -> Result<Predicate, ParserError> {
        if self.lexer.match_keyword("where") {
            self.lexer.eat_keyword("where")?;
            self.predicate()
        } else {
            Ok(Predicate::new())
        }
    }

    fn query(&mut self) -> Result<QueryData, ParserError> {
        self.lexer.eat_keyword("select")?;
        let fields = self.field_list()?;
        self.lexer.eat_keyword("from")?;
        let tables = self.field_list()?;
        let predicate = self.optional_where()?;
        Ok(QueryData {
            fields,
            tables,
            predicate,
        })
    }

    fn update_command(&mut self) -> Result<SQLStatement, ParserError> {
        if self.lexer.match_keyword("insert") {
            Ok(SQLStatement::InsertData(self.insert()?))
        } else if self.lexer.match_keyword("delete") {
            Ok(SQLStatement::DeleteData(self.delete()?))
        } else if self.lexer.match_keyword("update") {
            Ok(SQLStatement::ModifyData(self.modify()?))
        } else {
            self.create()
        }
    }

    fn create(&mut self) -> Result<SQLStatement, ParserError> {
        self.lexer.eat_keyword("create")?;
        if self.lexer.match_keyword("table") {
            Ok(SQLStatement::CreateTableData(self.create_table()?))
        } else if self.lexer.match_keyword("view") {
            Ok(SQLStatement::CreateViewData(self.create_view()?))
        } else if self.lexer.match_keyword("index") {
            Ok(SQLStatement::CreateIndexData(self.create_index()?))
        } else {
            Err(ParserError::expected(
                "table, view or index",
                &self.lexer.current_token,
            ))
        }
    }

    fn field_def(&mut self, schema: &mut Schema) -> Result<(), ParserError> {
        let field_name = self.lexer.eat_identifier()?;
        if schema.has_field(&field_name) {
            return Err(ParserError::new(&format!(
                "field {field_name} is declared twice"
            )));
        }
        if self.lexer.match_keyword("int") {
            self.lexer.eat_keyword("int")?;
            schema.add_int_field(&field_name);
        } else if self.lexer.match_keyword("varchar") {
            self.lexer.eat_keyword("varchar")?;
            self.lexer.eat_delim(Lexer::ROUND_OPEN)?;
            let size = self.lexer.eat_int_constant()?;
            self.lexer.eat_delim(Lexer::ROUND_CLOSE)?;
            let size = usize::try_from(size)
                .map_err(|_| ParserError::new(&format!("negative length for {field_name}")))?;
            schema.add_string_field(&field_name, size);
        } else {
            return Err(ParserError::expected("int or varchar", &self.lexer.current_token));
        }
        Ok(())
    }

    fn field_defs(&mut self) -> Result<Schema, ParserError> {
        let mut schema = Schema::new();
        self.field_def(&mut schema)?;
        while self.lexer.match_delim(Lexer::COMMA) {
            self.lexer.eat_delim(Lexer::COMMA)?;
            self.field_def(&mut schema)?;
        }
        Ok(schema)
    }

    fn create_table(&mut self) -> Result<CreateTableData, ParserError> {
        self.lexer.eat_keyword("table")?;
        let table_name = self.lexer.eat_identifier()?;
        self.lexer.eat_delim(Lexer::ROUND_OPEN)?;
        let schema = self.field_defs()?;
        self.lexer.eat_delim(Lexer::ROUND_CLOSE)?;
        Ok(CreateTableData { table_name, schema })
    }

    fn create_view(&mut self) -> Result<CreateViewData, ParserError> {
        self.lexer.eat_keyword("view")?;
        let view_name = self.lexer.eat_identifier()?;
        self.lexer.eat_keyword("as")?;
        let query_data = self.query()?;
        Ok(CreateViewData {
            view_name,
            query_data,
        })
    }

    fn create_index(&mut self) -> Result<CreateIndexData, ParserError> {
        self.lexer.eat_keyword("index")?;
        let index_name = self.lexer.eat_identifier()?;
        self.lexer.eat_keyword("on")?;
        let table_name = self.lexer.eat_identifier()?;
        self.lexer.eat_delim(Lexer::ROUND_OPEN)?;
        let field_name = self.lexer.eat_identifier()?;
        self.lexer.eat_delim(Lexer::ROUND_CLOSE)?;
        Ok(CreateIndexData {
            index_name,
            table_name,
            field_name,
        })
    }

    fn insert(&mut self) -> Result<InsertData, ParserError> {
        self.lexer.eat_keyword("insert")?;
        self.lexer.eat_keyword("into")?;
        let table_name = self.lexer.eat_identifier()?;
        self.lexer.eat_delim(Lexer::ROUND_OPEN)?;
        let fields = self.field_list()?;
        self.lexer.eat_delim(Lexer::ROUND_CLOSE)?;
        self.lexer.eat_keyword("values")?;
        self.lexer.eat_delim(Lexer::ROUND_OPEN)?;
        let values = self.constants()?;
        self.lexer.eat_delim(Lexer::ROUND_CLOSE)?;
        Ok(InsertData {
            table_name,
            fields,
            values,
        })
    }

    fn delete(&mut self) -> Result<DeleteData, ParserError> {
        self.lexer.eat_keyword("delete")?;
        self.lexer.eat_keyword("from")?;
        let table_name = self.lexer.eat_identifier()?;
        let predicate = self.optional_where()?;
        Ok(DeleteData {
            table_name,
            predicate,
        })
    }

    fn modify(&mut self) -> Result<ModifyData, ParserError> {
        self.lexer.eat_keyword("update")?;
        let table_name = self.lexer.eat_identifier()?;
        self.lexer.eat_keyword("set")?;
        let field_name = self.lexer.eat_identifier()?;
        self.lexer.eat_delim(Lexer::EQUAL)?;
        let new_value = self.expression()?;
        let predicate = self.optional_where()?;
        Ok(ModifyData {
            table_name,
            field_name,
            new_value,
            predicate,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SQLStatement {
    CreateTableData(CreateTableData),
    CreateViewData(CreateViewData),
    CreateIndexData(CreateIndexData),
    InsertData(InsertData),
    DeleteData(DeleteData),
    ModifyData(ModifyData),
}

/// `UPDATE table SET field = new_value [WHERE predicate]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyData {
    pub table_name: String,
    pub field_name: String,
    pub new_value: Expression,
    pub predicate: Predicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteData {
    pub table_name: String,
    pub predicate: Predicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertData {
    pub table_name: String,
    pub fields: Vec<String>,
    pub values: Vec<Constant>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTableData {
    pub table_name: String,
    pub schema: Schema,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateViewData {
    pub view_name: String,
    pub query_data: QueryData,
}

impl CreateViewData {
    /// The text stored in the view catalog
    pub fn view_def(&self) -> String {
        self.query_data.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateIndexData {
    pub index_name: String,
    pub table_name: String,
    pub field_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryData {
    pub fields: Vec<String>,
    pub tables: Vec<String>,
    pub predicate: Predicate,
}

/// Renders the query back into SQL that parses to the same `QueryData`
impl Display for QueryData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "select {} from {}",
            self.fields.join(", "),
            self.tables.join(", ")
        )?;
        if !self.predicate.is_empty() {
            write!(f, " where {}", self.predicate)?;
        }
        Ok(())
    }
}

struct Lexer<'a> {
    input: Peekable<Chars<'a>>,
    current_token: Option<Token>,
}

impl<'a> Lexer<'a> {
    const EQUAL: char = '=';
    const GREATER: char = '>';
    const LESS: char = '<';
    const COMMA: char = ',';
    const ROUND_OPEN: char = '(';
    const ROUND_CLOSE: char = ')';
    const SEMICOLON: char = ';';
    const KEYWORDS: [&'static str; 18] = [
        "select", "from", "where", "and", "insert", "into", "values", "delete", "update", "set",
        "create", "table", "int", "varchar", "view", "as", "index", "on",
    ];

    fn new(sql: &'a str) -> Result<Self, ParserError> {
        let mut lexer = Self {
            input: sql.chars().peekable(),
            current_token: None,
        };
        lexer.next_token()?;
        Ok(lexer)
    }

    fn parse_string(&mut self) -> Result<Token, ParserError> {
        self.input.next(); //  opening quote
        let mut string = String::new();
        loop {
            match self.input.next() {
                Some('\'') => return Ok(Token::StringConstant(string)),
                Some(c) => string.push(c),
                None => return Err(ParserError::new("unterminated string constant")),
            }
        }
    }

    fn parse_number(&mut self) -> Result<Token, ParserError> {
        let mut number = String::new();
        if self.input.peek() == Some(&'-') {
            number.push('-');
            self.input.next();
        }
        while let Some(&c) = self.input.peek() {
            if !c.is_ascii_digit() {
                break;
            }
            number.push(c);
            self.input.next();
        }
        number
            .parse()
            .map(Token::IntConstant)
            .map_err(|_| ParserError::new(&format!("bad integer constant {number}")))
    }

    fn parse_identifier_or_keyword(&mut self) -> Token {
        let mut word = String::new();
        while let Some(&c) = self.input.peek() {
            if !c.is_alphanumeric() && c != '_' {
                break;
            }
            word.push(c);
            self.input.next();
        }
        let word = word.to_lowercase();
        if Self::KEYWORDS.contains(&word.as_str()) {
            Token::Keyword(word)
        } else {
            Token::Identifier(word)
        }
    }

    /// Advance to the next token. At the end of input the current token becomes `None`
    fn next_token(&mut self) -> Result<Option<Token>, ParserError> {
        while self.input.next_if(|c| c.is_whitespace()).is_some() {}
        let token = match self.input.peek().copied() {
            None => None,
            Some(
                c @ (Self::EQUAL
                | Self::GREATER
                | Self::LESS
                | Self::COMMA
                | Self::ROUND_OPEN
                | Self::ROUND_CLOSE
                | Self::SEMICOLON),
            ) => {
                self.input.next();
                Some(Token::Delimiter(c))
            }
            Some('\'') => Some(self.parse_string()?),
            Some(c) if c.is_ascii_digit() || c == '-' => Some(self.parse_number()?),
            Some(c) if c.is_alphabetic() || c == '_' => Some(self.parse_identifier_or_keyword()),
            Some(c) => return Err(ParserError::new(&format!("unexpected character {c:?}"))),
        };
        self.current_token = token.clone();
        Ok(token)
    }

    fn match_delim(&self, ch: char) -> bool {
        matches!(self.current_token, Some(Token::Delimiter(d)) if d == ch)
    }

    fn eat_delim(&mut self, ch: char) -> Result<(), ParserError> {
        if !self.match_delim(ch) {
            return Err(ParserError::expected(&format!("'{ch}'"), &self.current_token));
        }
        self.next_token()?;
        Ok(())
    }

    fn eat_int_constant(&mut self) -> Result<i32, ParserError> {
        let Some(Token::IntConstant(i)) = self.current_token else {
            return Err(ParserError::expected("an integer", &self.current_token));
        };
        self.next_token()?;
        Ok(i)
    }

    fn match_string_constant(&self) -> bool {
        matches!(self.current_token, Some(Token::StringConstant(_)))
    }

    fn eat_string_constant(&mut self) -> Result<String, ParserError> {
        let Some(Token::StringConstant(s)) = self.current_token.clone() else {
            return Err(ParserError::expected("a string", &self.current_token));
        };
        self.next_token()?;
        Ok(s)
    }

    fn match_identifier(&self) -> bool {
        matches!(self.current_token, Some(Token::Identifier(_)))
    }

    fn eat_identifier(&mut self) -> Result<String, ParserError> {
        let Some(Token::Identifier(id)) = self.current_token.clone() else {
            return Err(ParserError::expected("an identifier", &self.current_token));
        };
        self.next_token()?;
        Ok(id)
    }

    fn match_keyword(&self, keyword: &str) -> bool {
        matches!(&self.current_token, Some(Token::Keyword(token)) if token == keyword)
    }

    fn eat_keyword(&mut self, keyword: &str) -> Result<(), ParserError> {
        if !self.match_keyword(keyword) {
            return Err(ParserError::expected(keyword, &self.current_token));
        }
        self.next_token()?;
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    Keyword(String),
    Identifier(String),
    IntConstant(i32),
    StringConstant(String),
    Delimiter(char),
}

impl Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Keyword(word) | Token::Identifier(word) => write!(f, "{word}"),
            Token::IntConstant(i) => write!(f, "{i}"),
            Token::StringConstant(s) => write!(f, "'{s}'"),
            Token::Delimiter(c) => write!(f, "'{c}'"),
        }
    }
}

#[cfg(test)]
mod parser_tests {
    use super::{Parser, SQLStatement};
    use crate::{
        query::{Constant, Expression, Operator, Term},
        record::FieldType,
    };

    fn field(name: &str) -> Expression {
        Expression::Field(name.to_string())
    }

    fn update_command(sql: &str) -> SQLStatement {
        Parser::new(sql).unwrap().parse_update_command().unwrap()
    }

    #[test]
    fn parse_basic_select_statement() {
        let sql = "SELECT name, age FROM users WHERE id = 3 AND name = 'John'";
        let query = Parser::new(sql).unwrap().parse_query().unwrap();

        assert_eq!(query.fields, vec!["name", "age"]);
        assert_eq!(query.tables, vec!["users"]);
        assert_eq!(
            query.predicate.terms(),
            &[
                Term::equality(field("id"), Expression::Constant(Constant::Int(3))),
                Term::equality(field("name"), Expression::Constant(Constant::from("John"))),
            ]
        );
    }

    #[test]
    fn test_join_query_round_trips_through_text() {
        let sql = "select name, oid from u, o where uid = uid and oid > -5;";
        let query = Parser::new(sql).unwrap().parse_query().unwrap();
        assert_eq!(query.tables, vec!["u", "o"]);
        assert_eq!(query.predicate.terms()[0].natural_join_field(), Some("uid"));

        let text = query.to_string();
        assert_eq!(text, "select name, oid from u, o where uid = uid and oid > -5");
        assert_eq!(Parser::new(&text).unwrap().parse_query().unwrap(), query);
    }

    #[test]
    fn test_create_table() {
        let sql = "CREATE TABLE students (id int, name varchar(20), age int)";
        let SQLStatement::CreateTableData(create_table) = update_command(sql) else {
            panic!("Expected CreateTableData");
        };
        assert_eq!(create_table.table_name, "students");
        assert_eq!(create_table.schema.fields(), &["id", "name", "age"]);
        assert_eq!(
            create_table.schema.field_type("name").unwrap(),
            FieldType::Varchar
        );
        assert_eq!(create_table.schema.length("name").unwrap(), 20);
    }

    #[test]
    fn test_insert() {
        let sql = "INSERT INTO users (name, age) VALUES ('Alice', 25)";
        let SQLStatement::InsertData(insert) = update_command(sql) else {
            panic!("Expected InsertData");
        };
        assert_eq!(insert.table_name, "users");
        assert_eq!(insert.fields, vec!["name", "age"]);
        assert_eq!(
            insert.values,
            vec![Constant::from("Alice"), Constant::Int(25)]
        );
    }

    #[test]
    fn test_delete() {
        let SQLStatement::DeleteData(delete) = update_command("DELETE FROM users WHERE age > 30")
        else {
            panic!("Expected DeleteData");
        };
        assert_eq!(delete.table_name, "users");
        assert_eq!(
            delete.predicate.terms(),
            &[Term::new(
                field("age"),
                Operator::GreaterThan,
                Expression::Constant(Constant::Int(30))
            )]
        );

        let SQLStatement::DeleteData(delete) = update_command("delete from users") else {
            panic!("Expected DeleteData");
        };
        assert!(delete.predicate.is_empty());
    }

    #[test]
    fn test_update() {
        let sql = "UPDATE employees SET salary = bonus WHERE department = 'IT'";
        let SQLStatement::ModifyData(modify) = update_command(sql) else {
            panic!("Expected ModifyData");
        };
        assert_eq!(modify.table_name, "employees");
        assert_eq!(modify.field_name, "salary");
        assert_eq!(modify.new_value, field("bonus"));
        assert_eq!(modify.predicate.to_string(), "department = 'IT'");
    }

    #[test]
    fn test_create_index() {
        let SQLStatement::CreateIndexData(create_index) =
            update_command("CREATE INDEX idx_name ON users (name)")
        else {
            panic!("Expected CreateIndexData");
        };
        assert_eq!(create_index.index_name, "idx_name");
        assert_eq!(create_index.table_name, "users");
        assert_eq!(create_index.field_name, "name");
    }

    #[test]
    fn test_create_view() {
        let sql =
            "CREATE VIEW high_salary AS SELECT name, salary FROM employees WHERE salary > 100000";
        let SQLStatement::CreateViewData(create_view) = update_command(sql) else {
            panic!("Expected CreateViewData");
        };
        assert_eq!(create_view.view_name, "high_salary");
        assert_eq!(create_view.query_data.fields, vec!["name", "salary"]);
        assert_eq!(
            create_view.view_def(),
            "select name, salary from employees where salary > 100000"
        );
    }

    #[test]
    fn test_syntax_errors() {
        for sql in [
            "select from t",
            "select a from t where",
            "select a from t extra",
            "select a from t;;",
            "insert into t (a) values (1",
            "create table t (a float)",
            "create table t (a int, a int)",
            "update t set a = 1 where b",
            "select a from t where s = 'open",
            "select a from t where a = 99999999999",
            "drop table t",
        ] {
            let parsed = Parser::new(sql).and_then(|parser| {
                if sql.starts_with("select") {
                    parser.parse_query().map(|_| ())
                } else {
                    parser.parse_update_command().map(|_| ())
                }
            });
            assert!(parsed.is_err(), "{sql} should not parse");
        }
    }
}

#[cfg(test)]
mod lexer_tests {
    use super::{Lexer, Token};

    fn tokens(sql: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(sql).unwrap();
        let mut tokens = vec![];
        while let Some(token) = lexer.current_token.clone() {
            tokens.push(token);
            lexer.next_token().unwrap();
        }
        tokens
    }

    #[test]
    fn lexer_test() {
        assert_eq!(
            tokens("select a, b2 from student where id = 3"),
            vec![
                Token::Keyword("select".to_string()),
                Token::Identifier("a".to_string()),
                Token::Delimiter(','),
                Token::Identifier("b2".to_string()),
                Token::Keyword("from".to_string()),
                Token::Identifier("student".to_string()),
                Token::Keyword("where".to_string()),
                Token::Identifier("id".to_string()),
                Token::Delimiter('='),
                Token::IntConstant(3),
            ]
        );
    }

    #[test]
    fn test_case_insensitive_keywords() {
        assert_eq!(
            tokens("SELECT Name FROM users WHERE city = 'New York'"),
            vec![
                Token::Keyword("select".to_string()),
                Token::Identifier("name".to_string()),
                Token::Keyword("from".to_string()),
                Token::Identifier("users".to_string()),
                Token::Keyword("where".to_string()),
                Token::Identifier("city".to_string()),
                Token::Delimiter('='),
                Token::StringConstant("New York".to_string()),
            ]
        );
    }

    #[test]
    fn test_negative_numbers_and_terminator() {
        assert_eq!(
            tokens("a<-12;"),
            vec![
                Token::Identifier("a".to_string()),
                Token::Delimiter('<'),
                Token::IntConstant(-12),
                Token::Delimiter(';'),
            ]
        );
    }
}
