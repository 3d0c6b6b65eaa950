use std::fmt;

use serde::{Deserialize, Serialize};

/// A named net carrying `width` bits; width 1 is a scalar wire, more is a bus
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signal {
    /// Name, unique within the module
    pub name: String,
    /// Number of bits, at least 1
    pub width: u32,
}

impl Signal {
    /// Create a signal
    pub fn new(name: &str, width: u32) -> Signal {
        Signal {
            name: name.to_owned(),
            width,
        }
    }

    /// Create a scalar signal
    pub fn scalar(name: &str) -> Signal {
        Signal::new(name, 1)
    }

    /// Bits of the signal, most significant first
    pub fn bits(&self) -> Vec<Bit> {
        if self.width == 1 {
            vec![Bit::scalar(&self.name)]
        } else {
            (0..self.width)
                .rev()
                .map(|i| Bit::indexed(&self.name, i))
                .collect()
        }
    }
}

/// A single wire: a scalar signal, or one bit of a bus
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Bit {
    /// Signal the bit belongs to
    pub signal: String,
    /// Index in the bus, None for scalar signals
    pub index: Option<u32>,
}

impl Bit {
    /// The single bit of a scalar signal
    pub fn scalar(signal: &str) -> Bit {
        Bit {
            signal: signal.to_owned(),
            index: None,
        }
    }

    /// One bit of a bus
    pub fn indexed(signal: &str, index: u32) -> Bit {
        Bit {
            signal: signal.to_owned(),
            index: Some(index),
        }
    }
}

impl fmt::Display for Bit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            None => write!(f, "{}", self.signal),
            Some(i) => write!(f, "{}.{}", self.signal, i),
        }
    }
}

/// Inclusive bit range `[top:bottom]` of a signal
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slice {
    /// Sliced signal
    pub signal: String,
    /// Most significant bit
    pub top: u32,
    /// Least significant bit
    pub bottom: u32,
}

impl Slice {
    /// Number of bits in the slice
    pub fn width(&self) -> u32 {
        self.top.saturating_sub(self.bottom) + 1
    }
}

/// Concatenation of connections, most significant first
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Concat {
    /// Parts of the concatenation
    pub parts: Vec<Connection>,
}

/// What a port of an instance is connected to, in the scope of the parent module
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connection {
    /// A whole signal
    Signal(String),
    /// A range of bits of a signal
    Slice(Slice),
    /// A concatenation of other connections
    Concat(Concat),
}

impl Connection {
    /// Connection to a whole signal
    pub fn signal(name: &str) -> Connection {
        Connection::Signal(name.to_owned())
    }

    /// Connection to a range of bits
    pub fn slice(name: &str, top: u32, bottom: u32) -> Connection {
        Connection::Slice(Slice {
            signal: name.to_owned(),
            top,
            bottom,
        })
    }

    /// Concatenation, most significant part first
    pub fn concat(parts: Vec<Connection>) -> Connection {
        Connection::Concat(Concat { parts })
    }

    /// Names of all signals referenced by the connection
    pub fn referenced_signals(&self) -> Vec<&str> {
        match self {
            Connection::Signal(s) => vec![s.as_str()],
            Connection::Slice(s) => vec![s.signal.as_str()],
            Connection::Concat(c) => c
                .parts
                .iter()
                .flat_map(|p| p.referenced_signals())
                .collect(),
        }
    }

    /// Replace every whole-signal reference to `from` by `to`
    pub fn rename_signal(&mut self, from: &str, to: &str) {
        match self {
            Connection::Signal(s) => {
                if s == from {
                    *s = to.to_owned();
                }
            }
            Connection::Slice(s) => {
                if s.signal == from {
                    s.signal = to.to_owned();
                }
            }
            Connection::Concat(c) => {
                for p in c.parts.iter_mut() {
                    p.rename_signal(from, to);
                }
            }
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connection::Signal(s) => write!(f, "{}", s),
            Connection::Slice(s) => write!(f, "{}[{}:{}]", s.signal, s.top, s.bottom),
            Connection::Concat(c) => {
                write!(f, "{{")?;
                for (i, p) in c.parts.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Direction of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Driven from outside the module
    Input,
    /// Driven by the module
    Output,
    /// Bidirectional
    Inout,
    /// Unspecified
    #[default]
    None,
}

/// A signal visible from outside the module
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Port {
    /// Signal of the port
    pub signal: Signal,
    /// Direction of the port
    #[serde(default)]
    pub direction: Direction,
}

impl Port {
    /// Create a port
    pub fn new(name: &str, width: u32, direction: Direction) -> Port {
        Port {
            signal: Signal::new(name, width),
            direction,
        }
    }

    /// Name of the port
    pub fn name(&self) -> &str {
        &self.signal.name
    }

    /// Width of the port
    pub fn width(&self) -> u32 {
        self.signal.width
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits() {
        let s = Signal::new("a", 3);
        let names: Vec<String> = s.bits().iter().map(|b| b.to_string()).collect();
        assert_eq!(names, vec!["a.2", "a.1", "a.0"]);
        assert_eq!(Signal::scalar("clk").bits(), vec![Bit::scalar("clk")]);
    }

    #[test]
    fn test_rename() {
        let mut c = Connection::concat(vec![
            Connection::signal("n1"),
            Connection::slice("bus", 3, 2),
            Connection::signal("n2"),
        ]);
        c.rename_signal("n1", "n1_p1");
        assert_eq!(c.referenced_signals(), vec!["n1_p1", "bus", "n2"]);
        assert_eq!(c.to_string(), "{n1_p1, bus[3:2], n2}");
    }
}
