// Error code constants
// CE0xxx: internal consistency errors surfaced as diagnostics before the
//         compiler gives up on a declaration
// CE2xxx: compile errors (fatal to codegen)
// CW2xxx: warnings (never block)
// RE2xxx: runtime error codes baked into generated code

// Internal / resolution errors (CE00xx)
pub const CE0004: &str = "CE0004"; // duplicate enum definition
pub const CE0006: &str = "CE0006"; // duplicate struct definition
pub const CE0020: &str = "CE0020"; // unknown type name
pub const CE0045: &str = "CE0045"; // unresolved type parameter

// Type errors (CE2xxx)
pub const CE2001: &str = "CE2001"; // unknown type
pub const CE2002: &str = "CE2002"; // assignment type mismatch
pub const CE2003: &str = "CE2003"; // return type mismatch
pub const CE2005: &str = "CE2005"; // non-bool condition
pub const CE2006: &str = "CE2006"; // argument type mismatch
pub const CE2007: &str = "CE2007"; // missing let type annotation
pub const CE2008: &str = "CE2008"; // undefined name
pub const CE2009: &str = "CE2009"; // arity mismatch
pub const CE2010: &str = "CE2010"; // zero-size fixed array
pub const CE2011: &str = "CE2011"; // array literal wrong length
pub const CE2012: &str = "CE2012"; // integer literal out of range
pub const CE2015: &str = "CE2015"; // invalid cast
pub const CE2023: &str = "CE2023"; // method argument type mismatch
pub const CE2024: &str = "CE2024"; // use of destroyed value
pub const CE2025: &str = "CE2025"; // unknown method for receiver type
pub const CE2030: &str = "CE2030"; // return without Result.Ok/Err
pub const CE2032: &str = "CE2032"; // `~` used as variable type
pub const CE2037: &str = "CE2037"; // printing Result directly
pub const CE2040: &str = "CE2040"; // non-exhaustive match
pub const CE2041: &str = "CE2041"; // duplicate match arm
pub const CE2044: &str = "CE2044"; // pattern arity mismatch
pub const CE2045: &str = "CE2045"; // unknown variant
pub const CE2046: &str = "CE2046"; // duplicate generic definition
pub const CE2047: &str = "CE2047"; // generic instantiation depth exceeded
pub const CE2048: &str = "CE2048"; // match scrutinee not an enum
pub const CE2050: &str = "CE2050"; // constructor arity mismatch
pub const CE2052: &str = "CE2052"; // perk constraint not satisfied
pub const CE2055: &str = "CE2055"; // non-stringifiable interpolation
pub const CE2060: &str = "CE2060"; // invalid const initializer
pub const CE2505: &str = "CE2505"; // unhandled Result
pub const CE2509: &str = "CE2509"; // `+` on strings
pub const CE2510: &str = "CE2510"; // mixed numeric types without cast

// Borrow errors (CE26xx)
pub const CE2601: &str = "CE2601"; // second mutable borrow
pub const CE2602: &str = "CE2602"; // mutable borrow while immutably borrowed
pub const CE2603: &str = "CE2603"; // use while mutably borrowed
pub const CE2604: &str = "CE2604"; // move or destroy while borrowed
pub const CE2605: &str = "CE2605"; // use after move

// Warnings
pub const CW2001: &str = "CW2001"; // unused Result value

// Runtime error codes (numeric halves are the exit codes)
pub const RE2020: &str = "RE2020"; // array index out of bounds
pub const RE2021: &str = "RE2021"; // allocation failure

/// Exit code used by generated code for out-of-bounds indexing.
pub const RE2020_EXIT: i32 = 2020;
/// Exit code used by generated code for allocation failure.
pub const RE2021_EXIT: i32 = 2021;
