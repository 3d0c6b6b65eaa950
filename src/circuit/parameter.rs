use std::fmt;

use serde::{Deserialize, Serialize};

/// SI order-of-magnitude prefix attached to a numeric parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiPrefix {
    /// 1e-24
    Yocto,
    /// 1e-21
    Zepto,
    /// 1e-18
    Atto,
    /// 1e-15
    Femto,
    /// 1e-12
    Pico,
    /// 1e-9
    Nano,
    /// 1e-6
    Micro,
    /// 1e-3
    Milli,
    /// 1e-2
    Centi,
    /// 1e-1
    Deci,
    /// 1e1
    Deca,
    /// 1e2
    Hecto,
    /// 1e3
    Kilo,
    /// 1e6
    Mega,
    /// 1e9
    Giga,
    /// 1e12
    Tera,
    /// 1e15
    Peta,
    /// 1e18
    Exa,
    /// 1e21
    Zetta,
    /// 1e24
    Yotta,
}

impl SiPrefix {
    /// Power of ten represented by the prefix
    pub fn exponent(&self) -> i32 {
        use SiPrefix::*;
        match self {
            Yocto => -24,
            Zepto => -21,
            Atto => -18,
            Femto => -15,
            Pico => -12,
            Nano => -9,
            Micro => -6,
            Milli => -3,
            Centi => -2,
            Deci => -1,
            Deca => 1,
            Hecto => 2,
            Kilo => 3,
            Mega => 6,
            Giga => 9,
            Tera => 12,
            Peta => 15,
            Exa => 18,
            Zetta => 21,
            Yotta => 24,
        }
    }

    /// Usual symbol of the prefix
    pub fn symbol(&self) -> &'static str {
        use SiPrefix::*;
        match self {
            Yocto => "y",
            Zepto => "z",
            Atto => "a",
            Femto => "f",
            Pico => "p",
            Nano => "n",
            Micro => "u",
            Milli => "m",
            Centi => "c",
            Deci => "d",
            Deca => "da",
            Hecto => "h",
            Kilo => "k",
            Mega => "M",
            Giga => "G",
            Tera => "T",
            Peta => "P",
            Exa => "E",
            Zetta => "Z",
            Yotta => "Y",
        }
    }
}

/// Payload of a parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamValue {
    /// Integer value
    Int(i64),
    /// Floating-point value
    Float(f64),
    /// Plain string, quoted when emitted
    String(String),
    /// Expression passed through to the deck without evaluation
    Literal(String),
}

/// A parameter value with an optional SI prefix scaling its numeric interpretation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Value
    pub value: ParamValue,
    /// Scale of a numeric value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<SiPrefix>,
}

impl Parameter {
    /// Unscaled integer parameter
    pub fn int(v: i64) -> Parameter {
        Parameter {
            value: ParamValue::Int(v),
            prefix: None,
        }
    }

    /// Unscaled floating-point parameter
    pub fn float(v: f64) -> Parameter {
        Parameter {
            value: ParamValue::Float(v),
            prefix: None,
        }
    }

    /// String parameter
    pub fn string(s: &str) -> Parameter {
        Parameter {
            value: ParamValue::String(s.to_owned()),
            prefix: None,
        }
    }

    /// Literal expression, emitted verbatim
    pub fn literal(s: &str) -> Parameter {
        Parameter {
            value: ParamValue::Literal(s.to_owned()),
            prefix: None,
        }
    }

    /// Attach an SI prefix
    pub fn with_prefix(self, prefix: SiPrefix) -> Parameter {
        Parameter {
            value: self.value,
            prefix: Some(prefix),
        }
    }

    /// Return whether the parameter is numeric
    pub fn is_numeric(&self) -> bool {
        matches!(self.value, ParamValue::Int(_) | ParamValue::Float(_))
    }

    /// Return whether the parameter is an expression
    pub fn is_literal(&self) -> bool {
        matches!(self.value, ParamValue::Literal(_))
    }

    /// Text of the parameter in simulator-deck syntax
    ///
    /// Numeric values are scaled by their prefix: an integer 5 tagged pico is `5e-12`.
    /// Strings are double-quoted and literal expressions are returned unchanged.
    pub fn to_deck_string(&self) -> String {
        let exp = self.prefix.map(|p| p.exponent()).unwrap_or(0);
        match &self.value {
            ParamValue::Int(v) => {
                if exp == 0 {
                    v.to_string()
                } else {
                    format!("{v}e{exp}")
                }
            }
            ParamValue::Float(v) => format_float(*v, exp),
            ParamValue::String(s) => format!("\"{s}\""),
            ParamValue::Literal(s) => s.clone(),
        }
    }

    /// Numeric value in base units, if any
    ///
    /// This is the correctly rounded value of the emitted text, so that it matches what the
    /// simulator reads.
    pub fn as_f64(&self) -> Option<f64> {
        if self.is_numeric() {
            self.to_deck_string().parse().ok()
        } else {
            None
        }
    }
}

/// Shortest round-trip text of `v * 10^exp`
fn format_float(v: f64, exp: i32) -> String {
    if v == 0.0 || !v.is_finite() {
        return v.to_string();
    }
    let sci = format!("{v:e}");
    let (mantissa, own_exp) = match sci.split_once('e') {
        Some((m, e)) => (m.to_owned(), e.parse::<i32>().unwrap_or(0)),
        None => (sci.clone(), 0),
    };
    let total = own_exp + exp;
    if exp == 0 && (-4..15).contains(&own_exp) {
        v.to_string()
    } else if total == 0 {
        mantissa
    } else {
        format!("{mantissa}e{total}")
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.value, self.prefix) {
            (ParamValue::Int(v), Some(p)) => write!(f, "{}{}", v, p.symbol()),
            (ParamValue::Float(v), Some(p)) => write!(f, "{}{}", v, p.symbol()),
            _ => write!(f, "{}", self.to_deck_string()),
        }
    }
}
