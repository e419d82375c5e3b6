//! The single permission representation shared by `ls` and `chmod`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PermissionError;

const SETUID: u16 = 0o4000;
const SETGID: u16 = 0o2000;
const STICKY: u16 = 0o1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    Execute,
}

impl Access {
    fn bit(self) -> u16 {
        match self {
            Access::Read => 0o4,
            Access::Write => 0o2,
            Access::Execute => 0o1,
        }
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Read => write!(f, "read"),
            Access::Write => write!(f, "write"),
            Access::Execute => write!(f, "execute"),
        }
    }
}

/// The permission class a user falls into for one entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Class {
    User,
    Group,
    Other,
}

impl Class {
    fn shift(self) -> u16 {
        match self {
            Class::User => 6,
            Class::Group => 3,
            Class::Other => 0,
        }
    }
}

/// Permission bits of a filesystem entry: rwx for user, group and other
/// plus the setuid, setgid and sticky bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mode(u16);

impl Mode {
    pub const fn from_bits(bits: u16) -> Mode {
        Mode(bits & 0o7777)
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    /// Parses three or four octal digits, e.g. `755` or `1777`.
    pub fn parse_octal(text: &str) -> Result<Mode, PermissionError> {
        let valid = matches!(text.len(), 3 | 4) && text.bytes().all(|b| (b'0'..=b'7').contains(&b));
        if !valid {
            return Err(PermissionError::InvalidMode(text.to_string()));
        }

        u16::from_str_radix(text, 8)
            .map(Mode::from_bits)
            .map_err(|_| PermissionError::InvalidMode(text.to_string()))
    }

    pub fn allows(self, class: Class, access: Access) -> bool {
        self.0 & (access.bit() << class.shift()) != 0
    }

    /// The nine-character `rwxr-xr-x` rendering used by `ls -l`.
    pub fn symbolic(self) -> String {
        let mut out = String::with_capacity(9);

        for (class, special, set_char) in [
            (Class::User, SETUID, 's'),
            (Class::Group, SETGID, 's'),
            (Class::Other, STICKY, 't'),
        ] {
            out.push(if self.allows(class, Access::Read) { 'r' } else { '-' });
            out.push(if self.allows(class, Access::Write) { 'w' } else { '-' });

            let exec = self.allows(class, Access::Execute);
            out.push(match (self.0 & special != 0, exec) {
                (true, true) => set_char,
                (true, false) => set_char.to_ascii_uppercase(),
                (false, true) => 'x',
                (false, false) => '-',
            });
        }

        out
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.symbolic())
    }
}

impl fmt::Octal for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Octal::fmt(&self.0, f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Add,
    Remove,
    Set,
}

/// One `[ugoa]*[+-=][rwx]+` clause of a symbolic mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Clause {
    classes: Vec<Class>,
    op: Op,
    perms: u16,
}

/// A parsed `chmod` mode argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModeSpec {
    Octal(Mode),
    Symbolic(Vec<Clause>),
}

impl FromStr for ModeSpec {
    type Err = PermissionError;

    fn from_str(text: &str) -> Result<ModeSpec, PermissionError> {
        if text.bytes().next().is_some_and(|b| b.is_ascii_digit()) {
            return Mode::parse_octal(text).map(ModeSpec::Octal);
        }

        text.split(',')
            .map(|clause| parse_clause(clause).ok_or_else(|| PermissionError::InvalidMode(text.to_string())))
            .collect::<Result<Vec<_>, _>>()
            .map(ModeSpec::Symbolic)
    }
}

/// `[ugoa]*[+-=][rwx]+`
fn parse_clause(clause: &str) -> Option<Clause> {
    let op_idx = clause.find(['+', '-', '='])?;
    let (who, rest) = clause.split_at(op_idx);

    let mut classes = Vec::new();
    for c in who.chars() {
        match c {
            'u' => classes.push(Class::User),
            'g' => classes.push(Class::Group),
            'o' => classes.push(Class::Other),
            'a' => classes.extend([Class::User, Class::Group, Class::Other]),
            _ => return None,
        }
    }
    if classes.is_empty() {
        classes.extend([Class::User, Class::Group, Class::Other]);
    }

    let mut chars = rest.chars();
    let op = match chars.next()? {
        '+' => Op::Add,
        '-' => Op::Remove,
        '=' => Op::Set,
        _ => return None,
    };

    let mut perms = 0;
    for c in chars {
        perms |= match c {
            'r' => Access::Read.bit(),
            'w' => Access::Write.bit(),
            'x' => Access::Execute.bit(),
            _ => return None,
        };
    }
    if perms == 0 {
        return None;
    }

    Some(Clause { classes, op, perms })
}

impl ModeSpec {
    /// Computes the mode that results from applying this spec to `current`.
    /// Symbolic clauses apply left to right.
    pub fn apply(&self, current: Mode) -> Mode {
        let clauses = match self {
            ModeSpec::Octal(mode) => return *mode,
            ModeSpec::Symbolic(clauses) => clauses,
        };

        let mut bits = current.bits();
        for clause in clauses {
            for class in &clause.classes {
                let mask = clause.perms << class.shift();
                match clause.op {
                    Op::Add => bits |= mask,
                    Op::Remove => bits &= !mask,
                    Op::Set => bits = (bits & !(0o7 << class.shift())) | mask,
                }
            }
        }

        Mode::from_bits(bits)
    }
}

/// A simulated user: a name and the groups it belongs to, primary first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub groups: Vec<String>,
}

impl Identity {
    pub fn new(name: &str, groups: &[&str]) -> Identity {
        Identity {
            name: name.to_string(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
        }
    }

    pub fn primary_group(&self) -> &str {
        self.groups.first().map(String::as_str).unwrap_or(&self.name)
    }

    pub fn is_root(&self) -> bool {
        self.name == "root"
    }
}

/// Anything carrying an owner, a group and permission bits.
pub trait Protected {
    fn owner(&self) -> &str;
    fn group(&self) -> &str;
    fn mode(&self) -> Mode;
    fn set_mode(&mut self, mode: Mode);
}

/// The most specific class `user` falls into for `entry`.
pub fn class_of(entry: &impl Protected, user: &Identity) -> Class {
    if entry.owner() == user.name {
        Class::User
    } else if user.groups.iter().any(|g| g == entry.group()) {
        Class::Group
    } else {
        Class::Other
    }
}

/// Whether `user` holds `requested` on `entry`. Only the most specific
/// class is consulted: an owner without the bit is refused even when
/// "other" has it.
pub fn check_access(entry: &impl Protected, user: &Identity, requested: Access) -> bool {
    entry.mode().allows(class_of(entry, user), requested)
}

/// Returns a copy of `entry` with `mode_spec` applied. The original is
/// untouched, so a bad spec never leaves a half-changed entry.
pub fn chmod<E: Protected + Clone>(entry: &E, mode_spec: &str) -> Result<E, PermissionError> {
    let spec: ModeSpec = mode_spec.parse()?;

    let mut updated = entry.clone();
    updated.set_mode(spec.apply(entry.mode()));
    Ok(updated)
}
