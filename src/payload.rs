/// Where a session gets the bytes it sends on each exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadSource {
    /// Formatted per exchange; `{client}` and `{iteration}` are substituted.
    Template(String),
    /// A fixed set, picked by `(client_id + iteration) % len`.
    Fixtures(Vec<Vec<u8>>),
}

impl PayloadSource {
    pub fn template(template: &str) -> Self {
        Self::Template(template.to_string())
    }

    pub fn fixtures<T: AsRef<[u8]>>(fixtures: &[T]) -> Self {
        Self::Fixtures(fixtures.iter().map(|f| f.as_ref().to_vec()).collect())
    }

    pub fn build(&self, client_id: usize, iteration: usize) -> Vec<u8> {
        match self {
            Self::Template(template) => template
                .replace("{client}", &client_id.to_string())
                .replace("{iteration}", &iteration.to_string())
                .into_bytes(),
            Self::Fixtures(fixtures) if fixtures.is_empty() => Vec::new(),
            Self::Fixtures(fixtures) => {
                fixtures[(client_id + iteration) % fixtures.len()].clone()
            }
        }
    }
}

impl Default for PayloadSource {
    fn default() -> Self {
        Self::template("Message {iteration} from client {client}\n")
    }
}
