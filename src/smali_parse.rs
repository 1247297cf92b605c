/* Line level recognisers for smali listings. The patcher and the listing disassembler only need
 * to understand a handful of directives; everything else is carried through as opaque text. */

use nom::branch::alt;
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::{digit1, space0, space1};
use nom::combinator::{map_res, opt};
use nom::multi::many0;
use nom::sequence::{preceded, terminated};
use nom::{IResult, Offset};

use crate::types::{MethodSignature, Modifier, ObjectIdentifier};

/// A parsed `.method` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MethodHeader<'a> {
    pub modifiers: Vec<Modifier>,
    pub name: &'a str,
    pub signature: &'a str,
    /// Byte offset of the method name inside the raw line
    pub name_offset: usize,
}

impl MethodHeader<'_> {
    pub fn has(&self, m: Modifier) -> bool {
        self.modifiers.contains(&m)
    }
}

/// What a single listing line means to the scanners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ListingLine<'a> {
    Class(ObjectIdentifier),
    MethodStart(MethodHeader<'a>),
    EndMethod,
    AnnotationStart { annotation_type: &'a str },
    EndAnnotation,
    ParamStart,
    EndParam,
    Registers(u32),
    Other,
}

fn modifier(smali: &str) -> IResult<&str, Modifier> {
    map_res(
        take_while1(|c: char| c.is_ascii_lowercase() || c == '-'),
        |word: &str| word.parse::<Modifier>(),
    )(smali)
}

fn parse_modifiers(smali: &str) -> IResult<&str, Vec<Modifier>> {
    many0(terminated(modifier, space1))(smali)
}

fn token(smali: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace())(smali)
}

fn parse_class_line(smali: &str) -> IResult<&str, ObjectIdentifier> {
    let (input, _) = terminated(tag(".class"), space1)(smali)?;
    let (input, _) = parse_modifiers(input)?;
    let (input, class_type) = token(input)?;
    match ObjectIdentifier::from_jni_type(class_type) {
        Some(o) => Ok((input, o)),
        None => Err(nom::Err::Error(nom::error::Error::new(
            smali,
            nom::error::ErrorKind::Verify,
        ))),
    }
}

fn parse_method_line(smali: &str) -> IResult<&str, (Vec<Modifier>, &str, &str)> {
    let (input, _) = terminated(tag(".method"), space1)(smali)?;
    let (input, modifiers) = parse_modifiers(input)?;
    let (input, name) = take_while1(|c: char| c != '(' && !c.is_whitespace())(input)?;
    let (input, signature) = token(input)?;
    Ok((input, (modifiers, name, signature)))
}

fn parse_annotation_line(smali: &str) -> IResult<&str, &str> {
    let (input, _) = terminated(tag(".annotation"), space1)(smali)?;
    let (input, _) = terminated(alt((tag("build"), tag("runtime"), tag("system"))), space1)(input)?;
    token(input)
}

fn parse_registers_line(smali: &str) -> IResult<&str, u32> {
    let (input, _) = terminated(alt((tag(".locals"), tag(".registers"))), space1)(smali)?;
    map_res(digit1, |d: &str| d.parse::<u32>())(input)
}

fn parse_param_line(smali: &str) -> IResult<&str, Option<&str>> {
    preceded(tag(".param"), opt(preceded(space1, token)))(smali)
}

/// Parses a `.method` header keeping track of where the name starts in the raw line. Headers
/// whose prototype is not a valid method descriptor are rejected.
pub(crate) fn method_header(line: &str) -> Option<MethodHeader<'_>> {
    let (_, body) = space0::<&str, nom::error::Error<&str>>(line).ok()?;
    let (_, (modifiers, name, signature)) = parse_method_line(body).ok()?;
    MethodSignature::from_jni(signature)?;
    let name_offset = line.offset(name);
    Some(MethodHeader {
        modifiers,
        name,
        signature,
        name_offset,
    })
}

/// Classifies one raw listing line (line terminator included or not).
pub(crate) fn classify(line: &str) -> ListingLine<'_> {
    let trimmed = line.trim();
    if !trimmed.starts_with('.') {
        return ListingLine::Other;
    }

    match trimmed {
        ".end method" => return ListingLine::EndMethod,
        ".end annotation" => return ListingLine::EndAnnotation,
        ".end param" => return ListingLine::EndParam,
        _ => {}
    }

    if let Some(header) = method_header(line) {
        return ListingLine::MethodStart(header);
    }
    if let Ok((_, class)) = parse_class_line(trimmed) {
        return ListingLine::Class(class);
    }
    if let Ok((_, annotation_type)) = parse_annotation_line(trimmed) {
        return ListingLine::AnnotationStart { annotation_type };
    }
    if let Ok((_, count)) = parse_registers_line(trimmed) {
        return ListingLine::Registers(count);
    }
    if let Ok((rest, _)) = parse_param_line(trimmed) {
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            return ListingLine::ParamStart;
        }
    }
    ListingLine::Other
}

/// Returns the header line with a `native` modifier inserted in front of the method name.
pub(crate) fn with_native_modifier(line: &str, header: &MethodHeader<'_>) -> String {
    let (head, tail) = line.split_at(header.name_offset);
    format!("{head}native {tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_class_line() {
        let (_, class) = parse_class_line(".class public final Lokhttp3/OkHttpClient;").unwrap();
        assert_eq!(class.as_java_type(), "okhttp3.OkHttpClient");
        assert!(parse_class_line(".class public").is_err());
    }

    #[test]
    fn test_method_header() {
        let line = "    .method public static synthetic access$000(Lcom/a/B;)I\n";
        let header = method_header(line).unwrap();
        assert_eq!(header.name, "access$000");
        assert_eq!(header.signature, "(Lcom/a/B;)I");
        assert!(header.has(Modifier::Synthetic));
        assert!(header.has(Modifier::Static));
        assert_eq!(&line[header.name_offset..header.name_offset + 10], "access$000");
    }

    #[test]
    fn test_method_header_constructor_and_name_prefixed_by_modifier() {
        let header = method_header(".method public constructor <init>()V").unwrap();
        assert_eq!(header.name, "<init>");
        assert!(header.has(Modifier::Constructor));

        let header = method_header(".method private nativeInit(J)V").unwrap();
        assert_eq!(header.name, "nativeInit");
        assert!(!header.has(Modifier::Native));
    }

    #[test]
    fn test_method_header_rejects_malformed_prototype() {
        assert!(method_header(".method public bar(Q)V").is_none());
        assert!(method_header(".method public bar(I)").is_none());
        assert!(method_header(".method public bar(Lcom/a/B)V").is_none());
        assert_eq!(classify(".method public bar(Q)V\n"), ListingLine::Other);
    }

    #[test]
    fn test_with_native_modifier() {
        let line = ".method public bar(I)V\n";
        let header = method_header(line).unwrap();
        assert_eq!(with_native_modifier(line, &header), ".method public native bar(I)V\n");
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("    .end method\r\n"), ListingLine::EndMethod);
        assert_eq!(classify("    .locals 2\n"), ListingLine::Registers(2));
        assert_eq!(classify("    .registers 10"), ListingLine::Registers(10));
        assert_eq!(
            classify("    .annotation runtime Lamimo/dcc/Dex2C;\n"),
            ListingLine::AnnotationStart { annotation_type: "Lamimo/dcc/Dex2C;" }
        );
        assert_eq!(classify("    .param p1, \"name\"    # Ljava/lang/String;"), ListingLine::ParamStart);
        assert_eq!(classify("    .parameter"), ListingLine::Other);
        assert_eq!(classify("    invoke-static {}, La;->b()V"), ListingLine::Other);
        assert_eq!(classify("    .line 12"), ListingLine::Other);
    }
}
