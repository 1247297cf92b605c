/* Descriptor, signature and method identity types shared by the catalog, the rule engine and
 * the listing patcher. Types are kept in the smali native (also JNI) form e.g. Ljava/lang/Object; */

use bitflags::bitflags;
use nom::bytes::complete::take_while1;
use nom::character::complete::{char, one_of};
use nom::multi::many0;
use nom::IResult;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::Error;

/// Name of the static initializer, never a compilation candidate.
pub const STATIC_INITIALIZER: &str = "<clinit>";

/// Represents a Java object identifier
///
/// # Examples
///
/// ```
///  use smali_native::types::ObjectIdentifier;
///
///  let o = ObjectIdentifier::from_java_type("com.basic.Test");
///  assert_eq!(o.as_jni_type(), "Lcom/basic/Test;");
///  assert_eq!(o.listing_path().to_str(), Some("com/basic/Test.smali"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectIdentifier {
    pub(crate) class_name: String,
}

impl fmt::Display for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_jni_type())
    }
}

impl ObjectIdentifier {
    /// Parses `Lcom/basic/Test;`, returning `None` for anything that is not an object descriptor.
    pub fn from_jni_type(t: &str) -> Option<ObjectIdentifier> {
        match parse_typesignature(t) {
            Ok(("", TypeSignature::Object(o))) => Some(o),
            _ => None,
        }
    }

    pub fn from_java_type(t: &str) -> ObjectIdentifier {
        ObjectIdentifier {
            class_name: t.replace('.', "/"),
        }
    }

    pub fn as_jni_type(&self) -> String {
        format!("L{};", self.class_name)
    }

    pub fn as_java_type(&self) -> String {
        self.class_name.replace('/', ".")
    }

    /// Slash separated internal name, e.g. `com/basic/Test`
    pub fn internal_name(&self) -> &str {
        &self.class_name
    }

    /// Package part of the internal name, `None` for the default package
    pub fn package_path(&self) -> Option<&str> {
        self.class_name.rsplit_once('/').map(|(package, _)| package)
    }

    /// Relative path of this type's listing inside a smali root
    pub fn listing_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.smali", self.class_name))
    }
}

/// Represents a Java type: array, object or primitive type
///
/// # Examples
///
/// ```
///  use smali_native::types::TypeSignature;
///
///  let t = TypeSignature::Bool;
///  assert_eq!(t.to_jni(), "Z");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeSignature {
    Array(Box<TypeSignature>),
    Object(ObjectIdentifier),
    Int,
    Bool,
    Byte,
    Char,
    Short,
    Long,
    Float,
    Double,
    Void,
}

impl TypeSignature {
    pub fn to_jni(&self) -> String {
        match self {
            TypeSignature::Array(a) => "[".to_string() + &a.to_jni(),
            TypeSignature::Bool => "Z".to_string(),
            TypeSignature::Byte => "B".to_string(),
            TypeSignature::Char => "C".to_string(),
            TypeSignature::Short => "S".to_string(),
            TypeSignature::Int => "I".to_string(),
            TypeSignature::Long => "J".to_string(),
            TypeSignature::Float => "F".to_string(),
            TypeSignature::Double => "D".to_string(),
            TypeSignature::Object(o) => o.as_jni_type(),
            TypeSignature::Void => "V".to_string(),
        }
    }
}

/// Represents a method prototype consisting of arguments and a return type
///
/// # Examples
///
/// ```
///  use smali_native::types::{MethodSignature, TypeSignature};
///
///  let m = MethodSignature::from_jni("([ILjava/lang/String;)V").unwrap();
///  assert_eq!(m.result, TypeSignature::Void);
///  assert_eq!(m.args.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    pub args: Vec<TypeSignature>,
    pub result: TypeSignature,
}

impl MethodSignature {
    /// Parses a complete prototype, trailing input is rejected.
    pub fn from_jni(s: &str) -> Option<MethodSignature> {
        match parse_methodsignature(s) {
            Ok(("", m)) => Some(m),
            _ => None,
        }
    }

    /// The argument descriptors without the surrounding parentheses
    pub fn args_jni(&self) -> String {
        self.args.iter().map(TypeSignature::to_jni).collect()
    }
}

pub(crate) fn parse_typesignature(smali: &str) -> IResult<&str, TypeSignature> {
    // Array
    let b: IResult<&str, char> = char('[')(smali);
    if let Ok((o, _)) = b {
        let (o, t) = parse_typesignature(o)?;
        return Ok((o, TypeSignature::Array(Box::new(t))));
    }

    // Object
    let l: IResult<&str, char> = char('L')(smali);
    if let Ok((o, _)) = l {
        let (o, t) = take_while1(|x| x != ';' && x != '(' && x != ')')(o)?;
        let (o, _) = char(';')(o)?;
        let object = ObjectIdentifier {
            class_name: t.to_string(),
        };
        return Ok((o, TypeSignature::Object(object)));
    }

    // Primitive Type
    let (o, p) = one_of("ZBCSIJFDV")(smali)?;
    let ts = match p {
        'Z' => TypeSignature::Bool,
        'B' => TypeSignature::Byte,
        'C' => TypeSignature::Char,
        'S' => TypeSignature::Short,
        'I' => TypeSignature::Int,
        'J' => TypeSignature::Long,
        'F' => TypeSignature::Float,
        'D' => TypeSignature::Double,
        _ => TypeSignature::Void,
    };
    Ok((o, ts))
}

pub(crate) fn parse_methodsignature(smali: &str) -> IResult<&str, MethodSignature> {
    let (o, _) = char('(')(smali)?;
    let (o, args) = many0(parse_typesignature)(o)?;
    let (o, _) = char(')')(o)?;
    let (o, result) = parse_typesignature(o)?;
    Ok((o, MethodSignature { args, result }))
}

/// Simple enum to represent Java method and class modifiers as written in a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    Public,
    Private,
    Protected,
    Static,
    Final,
    Synchronized,
    Volatile,
    Bridge,
    Transient,
    Varargs,
    Native,
    Interface,
    Abstract,
    Strict,
    Synthetic,
    Annotation,
    Enum,
    Constructor,
    DeclaredSynchronized,
}

impl FromStr for Modifier {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "public" => Self::Public,
            "protected" => Self::Protected,
            "private" => Self::Private,
            "static" => Self::Static,
            "final" => Self::Final,
            "abstract" => Self::Abstract,
            "interface" => Self::Interface,
            "synthetic" => Self::Synthetic,
            "transient" => Self::Transient,
            "volatile" => Self::Volatile,
            "synchronized" => Self::Synchronized,
            "native" => Self::Native,
            "varargs" => Self::Varargs,
            "annotation" => Self::Annotation,
            "enum" => Self::Enum,
            "strictfp" => Self::Strict,
            "bridge" => Self::Bridge,
            "constructor" => Self::Constructor,
            "declared-synchronized" => Self::DeclaredSynchronized,
            _ => return Err(Error::Structural(format!("unknown modifier `{s}`"))),
        })
    }
}

bitflags! {
    /// Predicates the rule engine needs about a single method
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MethodFlags: u8 {
        const SYNTHETIC = 0b0001;
        const NATIVE = 0b0010;
        const ANNOTATED = 0b0100;
        const STATIC_INITIALIZER = 0b1000;
    }
}

/// Identifies one method overload: owning type descriptor, name and prototype.
///
/// The concatenation of the three fields is the "full name" that rule files match against,
/// e.g. `Lcom/example/Foo;bar(I)V`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodIdentity {
    pub owner: String,
    pub name: String,
    pub signature: String,
}

impl MethodIdentity {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        MethodIdentity {
            owner: owner.into(),
            name: name.into(),
            signature: signature.into(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}{}{}", self.owner, self.name, self.signature)
    }

    /// The parameter part of the prototype including parentheses, e.g. `(ILjava/lang/String;)`
    pub fn parameters(&self) -> &str {
        match self.signature.find(')') {
            Some(end) => &self.signature[..=end],
            None => &self.signature,
        }
    }

    /// Key under which overloads differing only by return type collide.
    pub fn overload_key(&self) -> (&str, &str, &str) {
        (&self.owner, &self.name, self.parameters())
    }

}

impl fmt::Display for MethodIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.owner, self.name, self.signature)
    }
}

/// A catalogued method. Immutable once the catalog is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRecord {
    pub identity: MethodIdentity,
    pub flags: MethodFlags,
}

impl MethodRecord {
    pub fn is_synthetic(&self) -> bool {
        self.flags.contains(MethodFlags::SYNTHETIC)
    }

    pub fn is_native(&self) -> bool {
        self.flags.contains(MethodFlags::NATIVE)
    }

    pub fn is_annotated(&self) -> bool {
        self.flags.contains(MethodFlags::ANNOTATED)
    }

    pub fn is_static_initializer(&self) -> bool {
        self.flags.contains(MethodFlags::STATIC_INITIALIZER)
    }
}
