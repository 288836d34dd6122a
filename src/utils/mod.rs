pub mod time;

use nanoid::nanoid;

/// generate a unique id
pub fn longid() -> String {
    nanoid!()
}
