//! Stage prompt bodies. Placeholders use [`crate::prompts::PromptTemplate`]
//! syntax; every placeholder must be an input of its stage or `story_lang`.

pub const STORY: &str = "Write a user story based on the following premise:
persona_name: {persona_name}
user_story: {user_story}

Start by giving the user story a summary: [concise, memorable, human-readable story title]

User story format:
    As a: [persona type]
    I want to: [action or goal]
    So that: [benefit or value]
    Additional context: [optional details about the scenario, environment, or specific requirements]
    Acceptance criteria: [specific, measurable conditions that must be met for the story to be complete]
        *   **Scenario**: [concise, human-readable user scenario]
        *   **Given**: [initial context]
        *   **and Given**: [additional context, as many as needed]
        *   **When**: [event occurs]
        *   **Then**: [expected outcome]

All answers must be in {story_lang} and stay true to the persona.
";

pub const TASKS: &str = "All answers must be in {story_lang} and stay true to the persona.
Divide the user story below into tasks that are as granular as possible.
The goal is a list of tasks that can each be completed within a sprint, so break the story into
the smallest tasks that still add value to the end user. This makes progress easy to track.
Present a table with the task as the index and its description.

{story_content}
";

pub const DW: &str = "All answers must be in {story_lang}.
You are a data warehouse architect. Read the user story tasks below and propose a
dimensional model that stores the data needed to deliver them.

1. Extract the main nouns and verbs from the tasks; they hint at dimensions and facts.
2. Dimensional modelling: list the candidate dimensions (for example customer, product,
   store, professional, time) with their attributes. Present them as a table.
3. Fact modelling: identify the measurable events from the verbs and the numeric metrics
   attached to each. Present them as a table.
4. DW table structure: primary key, foreign keys to each dimension, metric columns, and the
   data type of every column. Present it as a table.
5. Include sample rows that could be inserted, based on the tasks. When mocking people, use
   names from this list: Breno, Amadei, Carlos, Mazurque, Kauy, Filipe, Renato, Wilgner,
   Rober, Diego, Iago, Tiago, Brunno, Koba.

Tasks:
{tasks_content}
";

pub const BIGQUERY: &str = "All answers must be in {story_lang}.
Turn the data warehouse proposal below into BigQuery artefacts:

1. A `bq mk --dataset` command creating a dataset with a name and location that suit the domain.
2. One `CREATE TABLE` statement per dimension, with a primary key column and typed attributes
   (INT64, STRING, DATE, FLOAT64, ...).
3. A `CREATE TABLE` statement for the fact table with foreign keys referencing each dimension
   and one typed column per metric.
4. If the proposal includes sample data, `INSERT INTO` statements loading it.

Data warehouse proposal:
{dw_content}
";

pub const CODE: &str = "Based on the list of tasks below, write Python code that implements the first task.
Identify the constraints that affect the implementation: time or resource limits, compatibility
with external APIs or libraries, and coding standards. State every assumption you make.
Directives:
- Follow the Google Python Style Guide
- Prefer existing tools and frameworks
- Keep the code reproducible across environments
- Comment each section of the code
- Provide usage examples
All answers must be in {story_lang} and stay true to the persona.
Write code for the first task only. Answer as a numbered list: the task name, a summary of the
code, the snippet itself, then as many items as needed to complete the explanation.

Tasks:
{tasks_content}
";

pub const TEST: &str = "All answers must be in {story_lang}.
You are an expert software developer who writes high-quality unit tests. Write a comprehensive
unit test suite for the code below covering happy paths, edge cases, error handling and boundary
conditions. Use the idiomatic test framework for the language, descriptive test names and the
Arrange-Act-Assert pattern. Suggest mocks or stubs for external dependencies and briefly explain
your testing approach and assumptions.

Code:
{code_content}
";

pub const OPENAPI: &str = "All answers must be in {story_lang}.
Write an OpenAPI 3.0 specification in YAML for a RESTful API that serves the data described by
the tasks below. Include:
- info: title, description, version, terms of service and contact
- servers: the base URL of the API behind Apigee X
- paths: list endpoints with pagination and optional filters, detail endpoints by id, and
  aggregated report endpoints
- components: a schema with example values for every entity
- security: an authentication scheme such as OAuth2 or API key

Tasks:
{tasks_content}
";

pub const APIGEE: &str = "All answers must be in {story_lang}.
Explain how to publish the OpenAPI specification below as an Apigee X proxy:
1. Save the specification as openapi.yaml.
2. Create the proxy with apigeecli: `apigeecli apis create -n <proxy-name> -f openapi.yaml`,
   choosing a proxy name that fits the API.
3. Note the prerequisites: apigeecli installed and authenticated against the Apigee X
   organisation (https://github.com/apigee/apigeecli), and a valid YAML specification.
4. Describe how the proxy can be customised further through the Apigee X console or API.

OpenAPI specification:
{openapi_content}
";

pub const DESCRIPTION_SPRINT_PLANNING: &str = "All answers should be provided in {story_lang}.
Explain this login screen in the format of a feature implementation for a user story.
This description will be used as the development backlog for the frontend, the backend, and the
Google Cloud deployment plan.
";

pub const DESCRIPTION_RANDOM_JOKES: &str = "All answers should be provided in {story_lang}.
Explain this napkin sketch in the format of a feature implementation for a user story.
The idea is a website of random jokes generated with Vertex AI using a Gemini flash model.
This description will be used as the development backlog for the frontend, the backend, and the
Google Cloud deployment plan.
";

pub const DESCRIPTION_TEST_PLAN: &str = "All answers should be provided in {story_lang}.
Explain this login screen in the format of a test plan for a user story.
This description will be used as the development backlog.
";

pub const DESCRIPTION_CUSTOM: &str = "All answers should be provided in {story_lang}.
Analyze this image and describe its contents in detail, focusing on development opportunities.
Then suggest applications or use cases for this image in the context of software development.
";

/// Appended to every image description prompt: the model receives text only.
pub const TEXT_ONLY_NOTE: &str =
    "\n[Note: This is a text-only simulation. In production, this would analyze the uploaded image.]";

pub const BACKEND: &str = "All answers should be provided in {story_lang}.
Use the generated description below to build a Flask (Python) backend for the planned sprint.

Generated description:
{description_content}

Provide a complete backend with route structure, database models where needed, API endpoints,
error handling, and security considerations.
";

pub const FRONTEND: &str = "All answers should be provided in {story_lang}.
Implement the frontend for the backend below.

Backend code:
{backend_content}

Provide the HTML structure, CSS styling, JavaScript behaviour, responsive layout, and the
integration with the backend API.
";

pub const DEPLOYMENT: &str = "All answers should be provided in {story_lang}.
Design the deployment architecture for this stateless application on Google Cloud using Cloud Run,
a database that fits the code, and Cloud Storage for images if needed. Deliver Terraform that
follows best practices: Cloud Run services, the database (Cloud SQL or Firestore), storage
buckets, IAM permissions, and environment variables.

Backend code:
{backend_content}

Frontend code:
{frontend_content}
";

pub const TEST_CASES: &str = "All answers should be provided in {story_lang}.
Use the generated description below to write test cases for the planned sprint.

Generated description:
{description_content}

Cover functional, UI/UX, integration, edge-case and error scenarios, plus performance and
security considerations.
";

pub const TEST_SCRIPT: &str = "All answers should be provided in {story_lang}.
Turn the test plan below into executable test scripts for the sprint using Python's unittest:
setup and teardown, test data management, assertions, reporting, and CI/CD integration.

Test plan:
{test_cases_content}
";

pub const SELENIUM: &str = "All answers should be provided in {story_lang}.
Automate the test plan below with Selenium: WebDriver setup, the Page Object Model, element
locators, wait strategies, test data handling, screenshots on failure, and parallel execution.

Test plan:
{test_cases_content}
";

pub const WCAG_ANALYSIS: &str = "All responses should be in {story_lang}.
Analyze the video of a user interacting with the {business_type}.
Identify specific accessibility issues and improvement opportunities based on the WCAG 2.1
guidelines.

Key areas to evaluate:
1. Perceivable: information and user interface components must be presentable in ways users can perceive.
2. Operable: user interface components and navigation must be operable.
3. Understandable: information and the operation of the interface must be understandable.
4. Robust: content must be interpretable by a wide variety of user agents, including assistive technologies.

Provide a table with:
Timestamp | WCAG Guideline | Issue Description | Conformance Level (A, AA, AAA) | Recommendation

Follow with a concise summary of overall compliance strengths and weaknesses and specific,
actionable recommendations.

Note: this is a simulated analysis. In production the video at {video_uri} would be analyzed.
";

pub const USER_STORIES: &str = "All responses should be in {story_lang}.
Group similar accessibility issues from the WCAG analysis below into user stories, in a table.

For each user story:
1. Use the format \"As a [user with specific accessibility needs], I want to [action] so that [benefit].\"
2. Prioritize by WCAG conformance level (A, AA, AAA).
3. Include the issue and the recommended solution.

Table format:
Priority | User Story | WCAG Guideline | Details

WCAG analysis:
{wcag_analysis}
";

pub const IMPLEMENTATION: &str = "All responses should be in {story_lang}.
Write a detailed implementation plan for the accessibility user stories below. For each story give
the technical approach, code examples (HTML, CSS, JavaScript, ARIA attributes), how to verify
compliance, priority and estimated effort, and dependencies. Format it as a guide developers
can follow.

User stories:
{user_stories}
";

pub const TEST_PLAN: &str = "All responses should be in {story_lang}.
Write a comprehensive accessibility test plan for the implementation below, including:
1. Automated tools and setup (axe-core, Lighthouse, ...)
2. Manual testing procedures
3. Screen reader scenarios
4. Keyboard navigation
5. Colour contrast and visual checks
6. User testing with people with disabilities
7. A WCAG 2.1 AA compliance checklist

Give specific test cases, expected results and acceptance criteria.

Implementation plan:
{implementation}
";
