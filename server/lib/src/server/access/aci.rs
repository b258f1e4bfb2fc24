//! Prescriptive access control items. Subentries carry these as text values;
//! this module gives them their parsed form and the predicates the evaluator
//! asks of them. All schema work (name normalisation, attribute resolution)
//! happens at parse time, so a stored item is evaluated without further
//! lookups and a malformed item is rejected before anything installs.

use std::collections::BTreeSet;
use std::fmt;

use crate::prelude::*;

/// A single right an item may grant or deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Permission {
    Add,
    Remove,
    Read,
    Browse,
    Modify,
    Rename,
    Export,
    Import,
    Compare,
    DiscloseOnError,
}

/// Minimum authentication strength an item demands of the requester.
/// Variant order is the strength order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuthLevel {
    None,
    Simple,
    Strong,
}

impl AuthLevel {
    /// The strength this identity attained. Password binds are simple;
    /// nothing in the bind path issues strong today, so strong-only items
    /// never apply.
    pub fn for_identity(ident: &Identity) -> Self {
        if ident.user_dn().is_some() {
            AuthLevel::Simple
        } else {
            AuthLevel::None
        }
    }
}

/// Who an item speaks about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserClass {
    AllUsers,
    Name(BTreeSet<Dn>),
    UserGroup(BTreeSet<Dn>),
    Subtree(Vec<Dn>),
}

impl UserClass {
    /// Does this class include the requesting identity?
    pub(crate) fn applies_to(&self, ident: &Identity) -> bool {
        match self {
            UserClass::AllUsers => true,
            UserClass::Name(names) => match ident.user_dn() {
                Some(dn) => names.contains(dn),
                None => false,
            },
            UserClass::UserGroup(groups) => groups.iter().any(|g| ident.is_memberof(g)),
            UserClass::Subtree(bases) => match ident.user_dn() {
                Some(dn) => bases.iter().any(|base| dn.is_under(base)),
                None => false,
            },
        }
    }
}

/// What an item speaks about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtectedItem {
    Entry,
    AllUserAttributeTypesAndValues,
    AttributeType(BTreeSet<AttrString>),
}

impl ProtectedItem {
    /// Does this item protect the named attribute, or the entry itself when
    /// no attribute is in question?
    pub(crate) fn covers(&self, attr: Option<&str>) -> bool {
        match (self, attr) {
            (ProtectedItem::Entry, None) => true,
            (ProtectedItem::AllUserAttributeTypesAndValues, Some(_)) => true,
            (ProtectedItem::AttributeType(attrs), Some(a)) => attrs.contains(a),
            _ => false,
        }
    }
}

/// One `userPermissions` element: the protected items it names and the
/// rights it grants or denies over them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPermission {
    pub protected: Vec<ProtectedItem>,
    pub grants: BTreeSet<Permission>,
    pub denials: BTreeSet<Permission>,
}

impl UserPermission {
    fn covers(&self, attr: Option<&str>) -> bool {
        self.protected.iter().any(|p| p.covers(attr))
    }
}

/// A parsed prescriptive item, ready for evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AciItem {
    pub tag: String,
    pub precedence: u8,
    pub auth_level: AuthLevel,
    pub user_classes: Vec<UserClass>,
    pub permissions: Vec<UserPermission>,
}

impl AciItem {
    /// Parse the text form of a prescriptive item. Any lexical, structural
    /// or resolution failure rejects the whole value.
    pub fn parse(
        raw: &str,
        schema: &(impl SchemaTransaction + ?Sized),
    ) -> Result<Self, OperationError> {
        lex(raw)
            .and_then(|tokens| {
                Parser {
                    tokens,
                    pos: 0,
                    schema,
                }
                .item()
            })
            .map_err(|reason| {
                security_error!(%reason, "Rejecting malformed access control item");
                OperationError::SchemaViolation(SchemaError::InvalidAttributeSyntax(
                    ATTR_PRESCRIPTIVE_ACI.to_string(),
                ))
            })
    }

    /// Does any user class of this item include the requester? The
    /// authentication level gate is separate, in the evaluator.
    pub fn applies_to(&self, ident: &Identity) -> bool {
        self.user_classes.iter().any(|uc| uc.applies_to(ident))
    }

    pub fn grants(&self, perm: Permission, attr: Option<&str>) -> bool {
        self.permissions
            .iter()
            .any(|up| up.covers(attr) && up.grants.contains(&perm))
    }

    pub fn denies(&self, perm: Permission, attr: Option<&str>) -> bool {
        self.permissions
            .iter()
            .any(|up| up.covers(attr) && up.denials.contains(&perm))
    }
}

// =========================================================================
// LEXER AND GRAMMAR WALK
// =========================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    Comma,
    Colon,
    Str(String),
    Num(u32),
    Ident(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Open => write!(f, "'{{'"),
            Token::Close => write!(f, "'}}'"),
            Token::Comma => write!(f, "','"),
            Token::Colon => write!(f, "':'"),
            Token::Str(s) => write!(f, "\"{}\"", s),
            Token::Num(n) => write!(f, "{}", n),
            Token::Ident(i) => write!(f, "'{}'", i),
        }
    }
}

fn lex(raw: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = raw.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '{' => {
                chars.next();
                tokens.push(Token::Open);
            }
            '}' => {
                chars.next();
                tokens.push(Token::Close);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            ':' => {
                chars.next();
                tokens.push(Token::Colon);
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some(c) => s.push(c),
                        None => return Err("unterminated quoted string".to_string()),
                    }
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() => {
                let mut s = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        s.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match s.parse::<u32>() {
                    Ok(n) => tokens.push(Token::Num(n)),
                    // Dotted numeric form, an oid.
                    Err(_) => tokens.push(Token::Ident(s)),
                }
            }
            c if c.is_ascii_alphabetic() => {
                let mut s = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                        s.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(s));
            }
            c => return Err(format!("unexpected character '{}'", c)),
        }
    }
    Ok(tokens)
}

struct Parser<'a, S: SchemaTransaction + ?Sized> {
    tokens: Vec<Token>,
    pos: usize,
    schema: &'a S,
}

impl<'a, S: SchemaTransaction + ?Sized> Parser<'a, S> {
    fn next(&mut self) -> Result<Token, String> {
        let t = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| "unexpected end of item".to_string())?;
        self.pos += 1;
        Ok(t)
    }

    fn expect(&mut self, want: Token) -> Result<(), String> {
        let t = self.next()?;
        if t == want {
            Ok(())
        } else {
            Err(format!("expected {}, found {}", want, t))
        }
    }

    /// Keywords are case sensitive, as in the source grammar.
    fn keyword(&mut self, kw: &str) -> Result<(), String> {
        match self.next()? {
            Token::Ident(i) if i == kw => Ok(()),
            t => Err(format!("expected '{}', found {}", kw, t)),
        }
    }

    fn ident(&mut self) -> Result<String, String> {
        match self.next()? {
            Token::Ident(i) => Ok(i),
            t => Err(format!("expected identifier, found {}", t)),
        }
    }

    fn quoted(&mut self) -> Result<String, String> {
        match self.next()? {
            Token::Str(s) => Ok(s),
            t => Err(format!("expected quoted string, found {}", t)),
        }
    }

    fn number(&mut self) -> Result<u32, String> {
        match self.next()? {
            Token::Num(n) => Ok(n),
            t => Err(format!("expected number, found {}", t)),
        }
    }

    /// After an element of a braced list: comma means more follow, close
    /// brace ends the list.
    fn sep_or_close(&mut self) -> Result<bool, String> {
        match self.next()? {
            Token::Comma => Ok(true),
            Token::Close => Ok(false),
            t => Err(format!("expected ',' or '}}', found {}", t)),
        }
    }

    fn dn(&mut self) -> Result<Dn, String> {
        let raw = self.quoted()?;
        Dn::parse(&raw, self.schema).map_err(|_| format!("invalid distinguished name '{}'", raw))
    }

    fn item(&mut self) -> Result<AciItem, String> {
        self.expect(Token::Open)?;
        self.keyword("identificationTag")?;
        let tag = self.quoted()?;
        self.expect(Token::Comma)?;

        self.keyword("precedence")?;
        let precedence = self.number()?;
        let precedence =
            u8::try_from(precedence).map_err(|_| format!("precedence {} out of range", precedence))?;
        self.expect(Token::Comma)?;

        self.keyword("authenticationLevel")?;
        let auth_level = match self.ident()?.as_str() {
            "none" => AuthLevel::None,
            "simple" => AuthLevel::Simple,
            "strong" => AuthLevel::Strong,
            other => return Err(format!("unknown authentication level '{}'", other)),
        };
        self.expect(Token::Comma)?;

        self.keyword("itemOrUserFirst")?;
        match self.ident()?.as_str() {
            "userFirst" => {}
            "itemFirst" => return Err("itemFirst items are not supported".to_string()),
            other => return Err(format!("expected 'userFirst', found '{}'", other)),
        }
        self.expect(Token::Colon)?;
        self.expect(Token::Open)?;

        self.keyword("userClasses")?;
        let user_classes = self.user_classes()?;
        self.expect(Token::Comma)?;

        self.keyword("userPermissions")?;
        let permissions = self.user_permissions()?;

        self.expect(Token::Close)?;
        self.expect(Token::Close)?;
        if self.pos != self.tokens.len() {
            return Err("trailing input after item".to_string());
        }

        Ok(AciItem {
            tag,
            precedence,
            auth_level,
            user_classes,
            permissions,
        })
    }

    fn user_classes(&mut self) -> Result<Vec<UserClass>, String> {
        self.expect(Token::Open)?;
        let mut out = Vec::new();
        loop {
            let uc = match self.ident()?.as_str() {
                "allUsers" => UserClass::AllUsers,
                "name" => UserClass::Name(self.dn_set()?),
                "userGroup" => UserClass::UserGroup(self.dn_set()?),
                "subtree" => UserClass::Subtree(self.subtree_specs()?),
                other => return Err(format!("unknown user class '{}'", other)),
            };
            out.push(uc);
            if !self.sep_or_close()? {
                break;
            }
        }
        Ok(out)
    }

    fn dn_set(&mut self) -> Result<BTreeSet<Dn>, String> {
        self.expect(Token::Open)?;
        let mut out = BTreeSet::new();
        loop {
            out.insert(self.dn()?);
            if !self.sep_or_close()? {
                break;
            }
        }
        Ok(out)
    }

    fn subtree_specs(&mut self) -> Result<Vec<Dn>, String> {
        self.expect(Token::Open)?;
        let mut out = Vec::new();
        loop {
            self.expect(Token::Open)?;
            self.keyword("base")?;
            out.push(self.dn()?);
            self.expect(Token::Close)?;
            if !self.sep_or_close()? {
                break;
            }
        }
        Ok(out)
    }

    fn user_permissions(&mut self) -> Result<Vec<UserPermission>, String> {
        self.expect(Token::Open)?;
        let mut out = Vec::new();
        loop {
            out.push(self.user_permission()?);
            if !self.sep_or_close()? {
                break;
            }
        }
        Ok(out)
    }

    fn user_permission(&mut self) -> Result<UserPermission, String> {
        self.expect(Token::Open)?;
        self.keyword("protectedItems")?;
        let protected = self.protected_items()?;
        self.expect(Token::Comma)?;
        self.keyword("grantsAndDenials")?;
        let (grants, denials) = self.rights()?;
        self.expect(Token::Close)?;
        Ok(UserPermission {
            protected,
            grants,
            denials,
        })
    }

    fn protected_items(&mut self) -> Result<Vec<ProtectedItem>, String> {
        self.expect(Token::Open)?;
        let mut out = Vec::new();
        loop {
            let pi = match self.ident()?.as_str() {
                "entry" => ProtectedItem::Entry,
                "allUserAttributeTypesAndValues" => ProtectedItem::AllUserAttributeTypesAndValues,
                "attributeType" => ProtectedItem::AttributeType(self.attr_set()?),
                other => return Err(format!("unknown protected item '{}'", other)),
            };
            out.push(pi);
            if !self.sep_or_close()? {
                break;
            }
        }
        Ok(out)
    }

    fn attr_set(&mut self) -> Result<BTreeSet<AttrString>, String> {
        self.expect(Token::Open)?;
        let mut out = BTreeSet::new();
        loop {
            let name = self.ident()?;
            let attr = self
                .schema
                .resolve_attr(&name)
                .map_err(|_| format!("unknown attribute type '{}'", name))?;
            out.insert(attr.name.clone());
            if !self.sep_or_close()? {
                break;
            }
        }
        Ok(out)
    }

    fn rights(&mut self) -> Result<(BTreeSet<Permission>, BTreeSet<Permission>), String> {
        self.expect(Token::Open)?;
        let mut grants = BTreeSet::new();
        let mut denials = BTreeSet::new();
        loop {
            let kw = self.ident()?;
            match right_token(&kw) {
                Some((true, p)) => {
                    grants.insert(p);
                }
                Some((false, p)) => {
                    denials.insert(p);
                }
                None => return Err(format!("unknown right '{}'", kw)),
            }
            if !self.sep_or_close()? {
                break;
            }
        }
        Ok((grants, denials))
    }
}

fn right_token(ident: &str) -> Option<(bool, Permission)> {
    let (grant, name) = if let Some(rest) = ident.strip_prefix("grant") {
        (true, rest)
    } else if let Some(rest) = ident.strip_prefix("deny") {
        (false, rest)
    } else {
        return None;
    };
    let p = match name {
        "Add" => Permission::Add,
        "Remove" => Permission::Remove,
        "Read" => Permission::Read,
        "Browse" => Permission::Browse,
        "Modify" => Permission::Modify,
        "Rename" => Permission::Rename,
        "Export" => Permission::Export,
        "Import" => Permission::Import,
        "Compare" => Permission::Compare,
        "DiscloseOnError" => Permission::DiscloseOnError,
        _ => return None,
    };
    Some((grant, p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;

    const ADD_ACI: &str = r#"{ identificationTag "addAci", precedence 14, authenticationLevel none, itemOrUserFirst userFirst: { userClasses { allUsers }, userPermissions { { protectedItems {entry, allUserAttributeTypesAndValues}, grantsAndDenials { grantAdd, grantBrowse } } } } }"#;

    fn assert_rejected(res: Result<AciItem, OperationError>) {
        match res {
            Err(OperationError::SchemaViolation(SchemaError::InvalidAttributeSyntax(a))) => {
                assert_eq!(a, ATTR_PRESCRIPTIVE_ACI)
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_aci_parse_user_first() {
        let schema = Schema::new().expect("failed to bootstrap schema");
        let sr = schema.read();

        let item = AciItem::parse(ADD_ACI, &sr).expect("failed to parse item");
        assert_eq!(item.tag, "addAci");
        assert_eq!(item.precedence, 14);
        assert_eq!(item.auth_level, AuthLevel::None);
        assert_eq!(item.user_classes, vec![UserClass::AllUsers]);
        assert_eq!(
            item.permissions,
            vec![UserPermission {
                protected: vec![
                    ProtectedItem::Entry,
                    ProtectedItem::AllUserAttributeTypesAndValues
                ],
                grants: btreeset![Permission::Add, Permission::Browse],
                denials: BTreeSet::new(),
            }]
        );
    }

    #[test]
    fn test_aci_parse_unbalanced_braces() {
        let schema = Schema::new().expect("failed to bootstrap schema");
        let sr = schema.read();

        // The canonical item with its final two braces cut off.
        let truncated = ADD_ACI.strip_suffix(" } }").expect("unexpected item text");
        assert_rejected(AciItem::parse(truncated, &sr));
    }

    #[test]
    fn test_aci_parse_precedence_out_of_range() {
        let schema = Schema::new().expect("failed to bootstrap schema");
        let sr = schema.read();

        let raw = ADD_ACI.replace("precedence 14", "precedence 300");
        assert_rejected(AciItem::parse(&raw, &sr));
    }

    #[test]
    fn test_aci_parse_item_first_unsupported() {
        let schema = Schema::new().expect("failed to bootstrap schema");
        let sr = schema.read();

        let raw = ADD_ACI.replace("userFirst:", "itemFirst:");
        assert_rejected(AciItem::parse(&raw, &sr));
    }

    #[test]
    fn test_aci_parse_unknown_right() {
        let schema = Schema::new().expect("failed to bootstrap schema");
        let sr = schema.read();

        let raw = ADD_ACI.replace("grantBrowse", "grantFly");
        assert_rejected(AciItem::parse(&raw, &sr));
    }

    #[test]
    fn test_aci_parse_trailing_garbage() {
        let schema = Schema::new().expect("failed to bootstrap schema");
        let sr = schema.read();

        let raw = format!("{} extra", ADD_ACI);
        assert_rejected(AciItem::parse(&raw, &sr));
    }

    #[test]
    fn test_aci_parse_name_class_normalises_dns() {
        let schema = Schema::new().expect("failed to bootstrap schema");
        let sr = schema.read();

        let raw = ADD_ACI.replace("allUsers", r#"name { "UID=Admin, OU=System" }"#);
        let item = AciItem::parse(&raw, &sr).expect("failed to parse item");

        let admin = Dn::parse("uid=admin,ou=system", &sr).expect("failed to parse dn");
        assert_eq!(item.user_classes, vec![UserClass::Name(btreeset![admin])]);
    }

    #[test]
    fn test_aci_parse_group_and_subtree_classes() {
        let schema = Schema::new().expect("failed to bootstrap schema");
        let sr = schema.read();

        let raw = ADD_ACI.replace(
            "allUsers",
            r#"userGroup { "cn=administrators,ou=groups,ou=system" }, subtree { { base "ou=people,ou=system" } }"#,
        );
        let item = AciItem::parse(&raw, &sr).expect("failed to parse item");

        let group =
            Dn::parse("cn=administrators,ou=groups,ou=system", &sr).expect("failed to parse dn");
        let base = Dn::parse("ou=people,ou=system", &sr).expect("failed to parse dn");
        assert_eq!(
            item.user_classes,
            vec![
                UserClass::UserGroup(btreeset![group]),
                UserClass::Subtree(vec![base]),
            ]
        );
    }

    #[test]
    fn test_aci_parse_attribute_types_resolve() {
        let schema = Schema::new().expect("failed to bootstrap schema");
        let sr = schema.read();

        let raw = ADD_ACI.replace("entry, allUserAttributeTypesAndValues", "attributeType { CN, sn }");
        let item = AciItem::parse(&raw, &sr).expect("failed to parse item");
        assert_eq!(
            item.permissions[0].protected,
            vec![ProtectedItem::AttributeType(btreeset![
                AttrString::from("cn"),
                AttrString::from("sn")
            ])]
        );

        let raw = ADD_ACI.replace(
            "entry, allUserAttributeTypesAndValues",
            "attributeType { flibber }",
        );
        assert_rejected(AciItem::parse(&raw, &sr));
    }

    #[test]
    fn test_aci_parse_multiple_permission_blocks() {
        let schema = Schema::new().expect("failed to bootstrap schema");
        let sr = schema.read();

        let raw = ADD_ACI.replace(
            "{ { protectedItems {entry, allUserAttributeTypesAndValues}, grantsAndDenials { grantAdd, grantBrowse } } }",
            "{ { protectedItems {entry}, grantsAndDenials { grantBrowse } }, { protectedItems { attributeType { userPassword } }, grantsAndDenials { denyRead, denyCompare } } }",
        );
        let item = AciItem::parse(&raw, &sr).expect("failed to parse item");
        assert_eq!(item.permissions.len(), 2);
        assert!(item.grants(Permission::Browse, None));
        assert!(item.denies(Permission::Read, Some("userpassword")));
        assert!(!item.denies(Permission::Read, Some("cn")));
    }

    #[test]
    fn test_aci_applies_to_identity() {
        let schema = Schema::new().expect("failed to bootstrap schema");
        let sr = schema.read();

        let user = Dn::parse("uid=claire,ou=people,ou=system", &sr).expect("failed to parse dn");
        let group = Dn::parse("cn=staff,ou=groups,ou=system", &sr).expect("failed to parse dn");
        let ident = Identity::from_impersonate_user(user.clone(), btreeset![group.clone()]);
        let anon = Identity::from_anonymous(Uuid::new_v4());

        assert!(UserClass::AllUsers.applies_to(&ident));
        assert!(UserClass::AllUsers.applies_to(&anon));

        let by_name = UserClass::Name(btreeset![user.clone()]);
        assert!(by_name.applies_to(&ident));
        assert!(!by_name.applies_to(&anon));

        let by_group = UserClass::UserGroup(btreeset![group]);
        assert!(by_group.applies_to(&ident));
        assert!(!by_group.applies_to(&anon));

        let people = Dn::parse("ou=people,ou=system", &sr).expect("failed to parse dn");
        let by_subtree = UserClass::Subtree(vec![people]);
        assert!(by_subtree.applies_to(&ident));
        assert!(!by_subtree.applies_to(&anon));

        assert_eq!(AuthLevel::for_identity(&ident), AuthLevel::Simple);
        assert_eq!(AuthLevel::for_identity(&anon), AuthLevel::None);
        assert!(AuthLevel::None < AuthLevel::Simple && AuthLevel::Simple < AuthLevel::Strong);
    }

    #[test]
    fn test_aci_grant_deny_predicates() {
        let schema = Schema::new().expect("failed to bootstrap schema");
        let sr = schema.read();

        let item = AciItem::parse(ADD_ACI, &sr).expect("failed to parse item");
        assert!(item.grants(Permission::Add, None));
        assert!(item.grants(Permission::Browse, Some("cn")));
        assert!(!item.grants(Permission::Read, None));
        assert!(!item.denies(Permission::Add, None));
    }
}
