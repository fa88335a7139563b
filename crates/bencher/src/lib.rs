use bytes::Bytes;

#[derive(Debug, Copy, Clone)]
pub struct TestCase {
    name: &'static str,
    group: TestGroup,
    payload: TestPayload,
}

impl TestCase {
    pub fn new(name: &'static str, group: TestGroup, payload: TestPayload) -> Self {
        Self { name, group, payload }
    }

    pub fn small(name: &'static str, payload: TestPayload) -> Self {
        Self::new(name, TestGroup::Small, payload)
    }

    pub fn normal(name: &'static str, payload: TestPayload) -> Self {
        Self::new(name, TestGroup::Normal, payload)
    }

    pub fn large(name: &'static str, payload: TestPayload) -> Self {
        Self::new(name, TestGroup::Large, payload)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn group(&self) -> TestGroup {
        self.group
    }

    pub fn payload(&self) -> &TestPayload {
        &self.payload
    }
}

/// A request body stored under `resources/payload`, with the media type it is sent as.
#[derive(Debug, Copy, Clone)]
pub struct TestPayload {
    file_name: &'static str,
    content_type: &'static str,
    content: &'static str,
}

impl TestPayload {
    pub const fn new(file_name: &'static str, content_type: &'static str, content: &'static str) -> Self {
        Self { file_name, content_type, content }
    }

    pub fn file_name(&self) -> &'static str {
        self.file_name
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    /// The wire bytes, multipart resources are stored with bare `\n` line endings.
    pub fn body(&self) -> Bytes {
        if self.content_type.starts_with("multipart/") {
            Bytes::from(self.content.replace('\n', "\r\n"))
        } else {
            Bytes::from_static(self.content.as_bytes())
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub enum TestGroup {
    Small,
    Normal,
    Large,
}

impl TestGroup {
    pub fn name(self) -> &'static str {
        match self {
            TestGroup::Small => "small",
            TestGroup::Normal => "normal",
            TestGroup::Large => "large",
        }
    }
}
