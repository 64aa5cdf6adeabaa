//! String-to-type conversion for constant bindings.

use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;

use crate::element::{ConverterDeclaration, Matcher};
use crate::error::{BoxError, Message};
use crate::key::{Key, TypeDescriptor};
use crate::plan::{Instance, instance_type_id};
use crate::source::Source;

/// Converts the text of a constant binding into a typed instance.
pub trait TypeConverter: Send + Sync {
    /// Converts `value` to type `to`. The result must be an `Arc<T>` for
    /// the `T` that `to` describes.
    fn convert(&self, value: &str, to: &TypeDescriptor) -> Result<Option<Instance>, BoxError>;
}

/// A converter backed by [`FromStr`].
pub struct ParseConverter<T>(PhantomData<fn() -> T>);

impl<T> ParseConverter<T> {
    pub fn new() -> Self {
        ParseConverter(PhantomData)
    }
}

impl<T> Default for ParseConverter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TypeConverter for ParseConverter<T>
where
    T: FromStr + Send + Sync + 'static,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    fn convert(&self, value: &str, _to: &TypeDescriptor) -> Result<Option<Instance>, BoxError> {
        let parsed: T = value.trim().parse()?;
        Ok(Some(Arc::new(parsed)))
    }
}

fn parse_declaration<T>() -> ConverterDeclaration
where
    T: FromStr + Send + Sync + 'static,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    ConverterDeclaration {
        matcher: Matcher::<TypeDescriptor>::of::<T>(),
        converter: Arc::new(ParseConverter::<T>::new()),
        source: Source::Framework,
    }
}

/// Converters every root environment starts with.
pub(crate) fn builtin_converters() -> Vec<ConverterDeclaration> {
    vec![
        parse_declaration::<i8>(),
        parse_declaration::<i16>(),
        parse_declaration::<i32>(),
        parse_declaration::<i64>(),
        parse_declaration::<i128>(),
        parse_declaration::<isize>(),
        parse_declaration::<u8>(),
        parse_declaration::<u16>(),
        parse_declaration::<u32>(),
        parse_declaration::<u64>(),
        parse_declaration::<u128>(),
        parse_declaration::<usize>(),
        parse_declaration::<f32>(),
        parse_declaration::<f64>(),
        parse_declaration::<bool>(),
        parse_declaration::<char>(),
    ]
}

/// Converts a constant for `key` using the converters visible to an
/// environment.
pub(crate) fn convert_constant(
    converters: &[ConverterDeclaration],
    key: &Key,
    value: &str,
) -> Result<Instance, Message> {
    if key.is::<String>() {
        return Ok(Arc::new(value.to_string()));
    }

    let ty = key.type_descriptor();
    let matching: Vec<&ConverterDeclaration> = converters
        .iter()
        .filter(|declaration| declaration.matcher.matches(&ty))
        .collect();

    let declaration = match matching.as_slice() {
        [] => return Err(Message::missing_converter(key, value)),
        [single] => *single,
        several => {
            let sources: Vec<Source> = several.iter().map(|d| d.source.clone()).collect();
            return Err(Message::ambiguous_conversion(key, value, &sources));
        }
    };

    match declaration.converter.convert(value, &ty) {
        Err(cause) => Err(Message::conversion_error(key, value, &declaration.source, cause)),
        Ok(None) => Err(Message::converter_returned_null(key, value, &declaration.source)),
        Ok(Some(instance)) if instance_type_id(&instance) != key.type_id() => {
            Err(Message::conversion_type_error(key, value, &declaration.source))
        }
        Ok(Some(instance)) => Ok(instance),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    struct Port(u16);

    struct NothingConverter;

    impl TypeConverter for NothingConverter {
        fn convert(&self, _value: &str, _to: &TypeDescriptor) -> Result<Option<Instance>, BoxError> {
            Ok(None)
        }
    }

    struct WrongTypeConverter;

    impl TypeConverter for WrongTypeConverter {
        fn convert(&self, _value: &str, _to: &TypeDescriptor) -> Result<Option<Instance>, BoxError> {
            Ok(Some(Arc::new("not a port")))
        }
    }

    struct PortConverter;

    impl TypeConverter for PortConverter {
        fn convert(&self, value: &str, _to: &TypeDescriptor) -> Result<Option<Instance>, BoxError> {
            Ok(Some(Arc::new(Port(value.parse()?))))
        }
    }

    fn declare(converter: Arc<dyn TypeConverter>, label: &'static str) -> ConverterDeclaration {
        ConverterDeclaration {
            matcher: Matcher::<TypeDescriptor>::of::<Port>(),
            converter,
            source: Source::label(label),
        }
    }

    #[test]
    fn builtin_primitives_convert() {
        let converters = builtin_converters();
        let port = convert_constant(&converters, &Key::named::<u16>("port"), "8080").unwrap();
        assert_eq!(*port.downcast_ref::<u16>().unwrap(), 8080);

        let flag = convert_constant(&converters, &Key::of::<bool>(), "true").unwrap();
        assert!(*flag.downcast_ref::<bool>().unwrap());

        let letter = convert_constant(&converters, &Key::of::<char>(), "x").unwrap();
        assert_eq!(*letter.downcast_ref::<char>().unwrap(), 'x');
    }

    #[test]
    fn strings_need_no_converter() {
        let text = convert_constant(&[], &Key::named::<String>("name"), "tether").unwrap();
        assert_eq!(text.downcast_ref::<String>().unwrap(), "tether");
    }

    #[test]
    fn failures_have_distinct_kinds() {
        let key = Key::of::<Port>();

        let err = convert_constant(&builtin_converters(), &key, "80").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingConverter);

        let err = convert_constant(&[declare(Arc::new(PortConverter), "p")], &key, "eighty").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConversionError);
        assert!(err.cause().is_some());

        let err = convert_constant(&[declare(Arc::new(NothingConverter), "n")], &key, "80").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConverterReturnedNull);

        let err = convert_constant(&[declare(Arc::new(WrongTypeConverter), "w")], &key, "80").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConversionTypeError);

        let err = convert_constant(
            &[
                declare(Arc::new(PortConverter), "first"),
                declare(Arc::new(PortConverter), "second"),
            ],
            &key,
            "80",
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmbiguousTypeConversion);
        assert!(err.message().contains("first and second"));
    }

    #[test]
    fn user_converter_produces_value() {
        let port = convert_constant(&[declare(Arc::new(PortConverter), "p")], &Key::of::<Port>(), "443")
            .unwrap();
        assert_eq!(port.downcast_ref::<Port>().unwrap().0, 443);
    }
}
